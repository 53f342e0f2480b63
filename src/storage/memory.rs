//! In-process catalog.
//!
//! Keeps the full catalog behind one async mutex, which serializes every
//! write and makes each operation atomic with respect to the others. Used by
//! tests and dry runs; nothing survives the process.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::models::{ChapterRecord, FetchState, ParentDetails, ParentItem};
use crate::storage::{CatalogStore, StorageResult, warn_backward_watermarks};

#[derive(Debug, Default)]
struct Inner {
    parents: Vec<ParentItem>,
    chapters: HashMap<i64, ChapterRecord>,
    /// `(parent_id, url)` → chapter id
    chapter_ids: HashMap<(i64, String), i64>,
    next_parent_id: i64,
    next_chapter_id: i64,
}

impl Inner {
    fn parent_mut(&mut self, parent_id: i64) -> StorageResult<&mut ParentItem> {
        self.parents
            .iter_mut()
            .find(|p| p.id == parent_id)
            .ok_or_else(|| StorageError::not_found(format!("parent item {parent_id}")))
    }

    fn chapter_mut(&mut self, chapter_id: i64) -> StorageResult<&mut ChapterRecord> {
        self.chapters
            .get_mut(&chapter_id)
            .ok_or_else(|| StorageError::not_found(format!("chapter {chapter_id}")))
    }

    fn chapters_of(&self, parent_id: i64) -> impl Iterator<Item = &ChapterRecord> {
        self.chapters.values().filter(move |c| c.parent_id == parent_id)
    }
}

/// Catalog kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn register_parent(
        &self,
        source_id: &str,
        url: &str,
        title: Option<&str>,
    ) -> StorageResult<ParentItem> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .parents
            .iter_mut()
            .find(|p| p.source_id == source_id && p.url == url)
        {
            if existing.title.is_none() {
                existing.title = title.map(str::to_string);
            }
            return Ok(existing.clone());
        }

        inner.next_parent_id += 1;
        let item = ParentItem {
            id: inner.next_parent_id,
            source_id: source_id.to_string(),
            url: url.to_string(),
            title: title.map(str::to_string),
            observed_remote_max_sequence: 0,
            stored_max_sequence: 0,
            last_synced_at: None,
            details: ParentDetails::default(),
        };
        inner.parents.push(item.clone());
        Ok(item)
    }

    async fn get_parent(&self, source_id: &str, url: &str) -> StorageResult<ParentItem> {
        let inner = self.inner.lock().await;
        inner
            .parents
            .iter()
            .find(|p| p.source_id == source_id && p.url == url)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("parent item ({source_id}, {url})")))
    }

    async fn get_parent_by_id(&self, parent_id: i64) -> StorageResult<ParentItem> {
        let mut inner = self.inner.lock().await;
        inner.parent_mut(parent_id).map(|p| p.clone())
    }

    async fn list_parents(&self) -> StorageResult<Vec<ParentItem>> {
        Ok(self.inner.lock().await.parents.clone())
    }

    async fn update_parent_details(
        &self,
        parent_id: i64,
        title: Option<&str>,
        details: &ParentDetails,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        let parent = inner.parent_mut(parent_id)?;
        if let Some(title) = title {
            parent.title = Some(title.to_string());
        }
        parent.details.merge(details);
        Ok(())
    }

    async fn list_chapter_urls(&self, parent_id: i64) -> StorageResult<HashSet<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.chapters_of(parent_id).map(|c| c.url.clone()).collect())
    }

    async fn list_unfetched_urls(&self, parent_id: i64) -> StorageResult<HashSet<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .chapters_of(parent_id)
            .filter(|c| !c.is_fetched())
            .map(|c| c.url.clone())
            .collect())
    }

    async fn list_chapters(&self, parent_id: i64) -> StorageResult<Vec<ChapterRecord>> {
        let inner = self.inner.lock().await;
        let mut chapters: Vec<ChapterRecord> = inner.chapters_of(parent_id).cloned().collect();
        chapters.sort_by_key(|c| (c.sequence_number, c.id));
        Ok(chapters)
    }

    async fn upsert_chapter(
        &self,
        parent_id: i64,
        url: &str,
        title: &str,
        sequence_number: u32,
    ) -> StorageResult<ChapterRecord> {
        let mut inner = self.inner.lock().await;
        inner.parent_mut(parent_id)?;

        let key = (parent_id, url.to_string());
        if let Some(&id) = inner.chapter_ids.get(&key) {
            let chapter = inner.chapter_mut(id)?;
            chapter.title = title.to_string();
            chapter.sequence_number = sequence_number;
            return Ok(chapter.clone());
        }

        inner.next_chapter_id += 1;
        let chapter = ChapterRecord {
            id: inner.next_chapter_id,
            parent_id,
            url: url.to_string(),
            title: title.to_string(),
            sequence_number,
            content: None,
            fetch_state: FetchState::Pending,
            content_updated_at: None,
        };
        inner.chapter_ids.insert(key, chapter.id);
        inner.chapters.insert(chapter.id, chapter.clone());
        Ok(chapter)
    }

    async fn update_chapter_content(&self, chapter_id: i64, content: &str) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        let chapter = inner.chapter_mut(chapter_id)?;
        chapter.content = Some(content.to_string());
        chapter.fetch_state = FetchState::Fetched;
        chapter.content_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_chapter_failed(&self, chapter_id: i64) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        let chapter = inner.chapter_mut(chapter_id)?;
        if !chapter.is_fetched() {
            chapter.fetch_state = FetchState::Failed;
        }
        Ok(())
    }

    async fn update_watermarks(
        &self,
        parent_id: i64,
        observed_max: u32,
        stored_max: u32,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        let parent = inner.parent_mut(parent_id)?;
        warn_backward_watermarks(
            parent_id,
            (parent.observed_remote_max_sequence, parent.stored_max_sequence),
            (observed_max, stored_max),
        );
        parent.observed_remote_max_sequence = parent.observed_remote_max_sequence.max(observed_max);
        parent.stored_max_sequence = parent.stored_max_sequence.max(stored_max);
        parent.last_synced_at = Some(Utc::now());
        Ok(())
    }
}
