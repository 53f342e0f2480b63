//! Catalog storage for parent items and their chapters.
//!
//! The catalog is the single writer of durable state. The delta resolver and
//! the fetch scheduler only ever see in-memory views handed out by the store;
//! the orchestrator applies their results through the operations below.
//!
//! Backends:
//! - [`SqliteCatalog`]: durable SQLite database (`sqlx`)
//! - [`MemoryCatalog`]: in-process catalog with the same guarantees

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{ChapterRecord, ParentDetails, ParentItem};

// Re-export for convenience
pub use memory::MemoryCatalog;
pub use sqlite::SqliteCatalog;

/// Result type alias for catalog operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Trait for catalog storage backends.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a parent item, or return the existing one with the same identity.
    ///
    /// A `title` given for an existing item without one is stored.
    async fn register_parent(
        &self,
        source_id: &str,
        url: &str,
        title: Option<&str>,
    ) -> StorageResult<ParentItem>;

    /// Look up a parent item by its identity.
    async fn get_parent(&self, source_id: &str, url: &str) -> StorageResult<ParentItem>;

    /// Look up a parent item by its id.
    async fn get_parent_by_id(&self, parent_id: i64) -> StorageResult<ParentItem>;

    /// All registered parent items, ordered by id.
    async fn list_parents(&self) -> StorageResult<Vec<ParentItem>>;

    /// Refresh the title and descriptive metadata of a parent item.
    ///
    /// Only fields present in the arguments are overwritten; watermarks are
    /// never touched.
    async fn update_parent_details(
        &self,
        parent_id: i64,
        title: Option<&str>,
        details: &ParentDetails,
    ) -> StorageResult<()>;

    /// URLs of every stored chapter of a parent item.
    async fn list_chapter_urls(&self, parent_id: i64) -> StorageResult<HashSet<String>>;

    /// URLs of stored chapters whose content is still missing (pending or failed).
    async fn list_unfetched_urls(&self, parent_id: i64) -> StorageResult<HashSet<String>>;

    /// Stored chapters of a parent item, ordered by sequence number then id.
    async fn list_chapters(&self, parent_id: i64) -> StorageResult<Vec<ChapterRecord>>;

    /// Create a chapter, or refresh title and sequence number of the existing
    /// one with the same `(parent_id, url)`. New chapters start `Pending`.
    async fn upsert_chapter(
        &self,
        parent_id: i64,
        url: &str,
        title: &str,
        sequence_number: u32,
    ) -> StorageResult<ChapterRecord>;

    /// Store content and mark the chapter `Fetched` in one atomic write.
    async fn update_chapter_content(&self, chapter_id: i64, content: &str) -> StorageResult<()>;

    /// Mark a chapter `Failed`. A chapter that is already `Fetched` is left alone.
    async fn mark_chapter_failed(&self, chapter_id: i64) -> StorageResult<()>;

    /// Advance both watermarks and stamp `last_synced_at`.
    ///
    /// Each watermark becomes `max(current, requested)`; a backward request
    /// is logged and ignored rather than failing the pass.
    async fn update_watermarks(
        &self,
        parent_id: i64,
        observed_max: u32,
        stored_max: u32,
    ) -> StorageResult<()>;
}

/// Log a watermark update that would move a counter backwards.
pub(crate) fn warn_backward_watermarks(
    parent_id: i64,
    current: (u32, u32),
    requested: (u32, u32),
) {
    if requested.0 < current.0 {
        log::warn!(
            "Ignoring backward observed watermark for parent {}: {} -> {}",
            parent_id,
            current.0,
            requested.0
        );
    }
    if requested.1 < current.1 {
        log::warn!(
            "Ignoring backward stored watermark for parent {}: {} -> {}",
            parent_id,
            current.1,
            requested.1
        );
    }
}
