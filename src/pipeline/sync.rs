// src/pipeline/sync.rs

//! Synchronization pass for one parent item.
//!
//! ```text
//! LISTING → RESOLVING → FETCHING → PERSISTING → DONE
//!    └──────────┴───────────┴───────────┴─────→ FAILED
//! ```
//!
//! Chapter writes all happen in PERSISTING, and the watermarks are written
//! last. A pass that fails before that leaves the catalog untouched; one that
//! fails during it leaves chapters whose state is picked up by the next pass.
//! Parent metadata from the listing page is refreshed in PERSISTING too, but
//! a failure there is only logged.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{ParentItem, ParentPage, PassState, RunReport, SyncConfig};
use crate::pipeline::fetch::{FetchReport, FetchResult, FetchScheduler};
use crate::pipeline::lease::LeaseTable;
use crate::pipeline::resolve::{Classification, Resolution, resolve};
use crate::sources::SourceRegistry;
use crate::storage::CatalogStore;

/// Runs synchronization passes against an injected catalog and source registry.
pub struct SyncOrchestrator {
    store: Arc<dyn CatalogStore>,
    sources: SourceRegistry,
    scheduler: FetchScheduler,
    leases: LeaseTable,
    max_parallel_items: usize,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn CatalogStore>, sources: SourceRegistry, config: &SyncConfig) -> Self {
        Self {
            store,
            sources,
            scheduler: FetchScheduler::new(config),
            leases: LeaseTable::new(),
            max_parallel_items: config.max_parallel_items.max(1),
        }
    }

    /// Share a lease table with other orchestrators writing to the same store.
    pub fn with_leases(mut self, leases: LeaseTable) -> Self {
        self.leases = leases;
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    pub fn max_parallel_items(&self) -> usize {
        self.max_parallel_items
    }

    /// Run one pass for a parent item.
    pub async fn run_sync(&self, parent_id: i64) -> Result<RunReport> {
        self.run_sync_with_cancel(parent_id, &CancellationToken::new())
            .await
    }

    /// Run one pass, stopping new fetch dispatches once `cancel` fires.
    ///
    /// Whatever was fetched before cancellation is still persisted.
    pub async fn run_sync_with_cancel(
        &self,
        parent_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let _lease = self
            .leases
            .try_acquire(parent_id)
            .ok_or(AppError::PassInProgress(parent_id))?;

        let started = Instant::now();
        let result = self.run_pass(parent_id, cancel, started).await;
        match &result {
            Ok(report) => log::info!("{}", report.summary()),
            Err(e) => {
                transition(parent_id, PassState::Failed);
                log::error!("Pass for parent {} failed: {}", parent_id, e);
            }
        }
        result
    }

    async fn run_pass(
        &self,
        parent_id: i64,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<RunReport> {
        let parent = self.store.get_parent_by_id(parent_id).await?;
        let source = self.sources.get(&parent.source_id)?;
        log::debug!("Syncing parent {} ({})", parent.id, parent.label());

        transition(parent_id, PassState::Listing);
        let page = source.adapter.read_parent(&parent.url).await?;
        let listing = &page.chapters;

        transition(parent_id, PassState::Resolving);
        let stored = self.store.list_chapter_urls(parent_id).await?;
        let unfetched = self.store.list_unfetched_urls(parent_id).await?;
        let resolution = resolve(
            listing,
            &stored,
            &unfetched,
            parent.observed_remote_max_sequence,
        );

        if resolution.conflict {
            transition(parent_id, PassState::Done);
            return Ok(RunReport {
                parent_id,
                new_chapters_count: 0,
                failed_chapters_count: 0,
                discovered_count: 0,
                retried_count: 0,
                observed_max_sequence: parent.observed_remote_max_sequence,
                stored_max_sequence: parent.stored_max_sequence,
                had_conflict: true,
                cancelled: false,
                duration_ms: elapsed_ms(started),
            });
        }

        transition(parent_id, PassState::Fetching);
        if !resolution.has_work() {
            log::debug!("parent {}: nothing to fetch", parent_id);
        }
        let fetched = self
            .scheduler
            .run(source, resolution.work.clone(), cancel)
            .await;

        transition(parent_id, PassState::Persisting);
        let (observed_max, stored_max) = self
            .persist(&parent, &page, &resolution, &fetched)
            .await?;

        transition(parent_id, PassState::Done);
        Ok(RunReport {
            parent_id,
            new_chapters_count: fetched.fetched_count(),
            failed_chapters_count: fetched.failed_count(),
            discovered_count: resolution.count(Classification::New),
            retried_count: resolution.count(Classification::Retry),
            observed_max_sequence: observed_max,
            stored_max_sequence: stored_max,
            had_conflict: false,
            cancelled: fetched.cancelled,
            duration_ms: elapsed_ms(started),
        })
    }

    /// Apply a pass's results to the catalog; returns the new watermarks.
    async fn persist(
        &self,
        parent: &ParentItem,
        page: &ParentPage,
        resolution: &Resolution,
        fetched: &FetchReport,
    ) -> Result<(u32, u32)> {
        let mut chapter_ids = HashMap::with_capacity(resolution.entries.len());
        for entry in &resolution.entries {
            let listing = &entry.listing;
            let record = self
                .store
                .upsert_chapter(
                    parent.id,
                    &listing.url,
                    &listing.title,
                    listing.sequence_number,
                )
                .await?;
            chapter_ids.insert(listing.url.as_str(), record.id);
        }
        self.refresh_details(parent, page).await;

        for outcome in &fetched.outcomes {
            let Some(&chapter_id) = chapter_ids.get(outcome.url.as_str()) else {
                log::warn!("Fetched {} which is not in the listing", outcome.url);
                continue;
            };
            match &outcome.result {
                FetchResult::Fetched(content) => {
                    self.store.update_chapter_content(chapter_id, content).await?
                }
                FetchResult::Failed(_) => self.store.mark_chapter_failed(chapter_id).await?,
            }
        }

        let observed_max = parent
            .observed_remote_max_sequence
            .max(resolution.observed_remote_max);
        let stored_max = parent
            .stored_max_sequence
            .max(fetched.max_fetched_sequence().unwrap_or(0));
        self.store
            .update_watermarks(parent.id, observed_max, stored_max)
            .await?;
        Ok((observed_max, stored_max))
    }

    /// Metadata failures never fail the pass.
    async fn refresh_details(&self, parent: &ParentItem, page: &ParentPage) {
        let details = page.details.clone().unwrap_or_default();
        if page.title.is_none() && details.is_empty() {
            return;
        }
        if let Err(e) = self
            .store
            .update_parent_details(parent.id, page.title.as_deref(), &details)
            .await
        {
            log::warn!("parent {}: metadata refresh failed: {}", parent.id, e);
        }
    }
}

fn transition(parent_id: i64, state: PassState) {
    log::debug!("parent {}: {}", parent_id, state);
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
