//! Synchronization of several parent items.

use futures::future;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::RunReport;
use crate::pipeline::sync::SyncOrchestrator;

/// Summary of a batch run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One entry per started pass, in completion order
    pub results: Vec<(i64, Result<RunReport>)>,
    /// Parent items not started because the batch was cancelled
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn reports(&self) -> impl Iterator<Item = &RunReport> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (i64, &AppError)> {
        self.results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Sync the given parent items, `max_parallel_items` at a time.
///
/// A failing pass never stops the others. Once `cancel` fires no further
/// passes start, and running ones stop dispatching fetches.
pub async fn run_batch(
    orchestrator: &SyncOrchestrator,
    parent_ids: &[i64],
    cancel: &CancellationToken,
) -> BatchOutcome {
    let results: Vec<(i64, Result<RunReport>)> = stream::iter(parent_ids.iter().copied())
        .take_while(|_| future::ready(!cancel.is_cancelled()))
        .map(|parent_id| async move {
            let result = orchestrator.run_sync_with_cancel(parent_id, cancel).await;
            (parent_id, result)
        })
        .buffer_unordered(orchestrator.max_parallel_items())
        .collect()
        .await;

    let outcome = BatchOutcome {
        skipped: parent_ids.len() - results.len(),
        results,
    };
    log::info!(
        "Batch finished: {} pass(es), {} failed, {} skipped",
        outcome.results.len(),
        outcome.failure_count(),
        outcome.skipped
    );
    outcome
}

/// Sync every registered parent item.
pub async fn run_all(
    orchestrator: &SyncOrchestrator,
    cancel: &CancellationToken,
) -> Result<BatchOutcome> {
    let parent_ids: Vec<i64> = orchestrator
        .store()
        .list_parents()
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    log::info!("Syncing {} parent item(s)", parent_ids.len());
    Ok(run_batch(orchestrator, &parent_ids, cancel).await)
}
