//! SQLite catalog backed by `sqlx`.
//!
//! ## Schema
//!
//! ```text
//! parents   (id, source_id, url, title, observed_max_sequence,
//!            stored_max_sequence, last_synced_at, author, description,
//!            cover_image_url, is_completed, rating, genres)
//!                                                      UNIQUE (source_id, url)
//! chapters  (id, parent_id, url, title, sequence_number, content,
//!            fetch_state, content_updated_at)           UNIQUE (parent_id, url)
//! ```
//!
//! Uniqueness of `(parent_id, url)` is what makes `upsert_chapter`
//! idempotent, and `CHECK (fetch_state <> 'fetched' OR content IS NOT NULL)`
//! guarantees no chapter is ever `fetched` without content. Watermarks are
//! advanced with `MAX()` inside a single `UPDATE`, so two writers can never
//! regress each other. `genres` holds a JSON array of names.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::StorageError;
use crate::models::{ChapterRecord, FetchState, ParentDetails, ParentItem};
use crate::storage::{CatalogStore, StorageResult, warn_backward_watermarks};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// A pass writes from a handful of tasks at most.
const MAX_CONNECTIONS: u32 = 4;

/// Durable catalog in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    async fn new(options: SqliteConnectOptions, max: u32) -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            // Applies the query-based PRAGMAs to every pooled connection.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max)
            .connect_with(options)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open (or create) the catalog at the given path and run migrations.
    pub async fn connect(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(StorageError::io)?;
        }
        let options = Self::base_options().filename(path).create_if_missing(true);
        log::debug!("Opening catalog at {}", path.display());
        Self::new(options, MAX_CONNECTIONS).await
    }

    /// Connect to an in-memory catalog.
    ///
    /// Limited to one connection: separate in-memory connections would each
    /// see their own empty database.
    pub async fn connect_in_memory() -> StorageResult<Self> {
        let options = Self::base_options().filename(":memory:");
        Self::new(options, 1).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Several passes may write at once; let them queue instead of failing with SQLITE_BUSY.
            .busy_timeout(Duration::from_millis(5_000))
    }

    async fn apply_pragmas(
        conn: &mut SqliteConnection,
        _meta: PoolConnectionMetadata,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA temp_store = MEMORY;
                PRAGMA cache_size = -8192;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool, waiting for checked-out connections.
    pub async fn close(&self) {
        if let Err(e) = sqlx::query("PRAGMA optimize").execute(&self.pool).await {
            log::debug!("PRAGMA optimize failed: {}", e);
        }
        self.pool.close().await;
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn register_parent(
        &self,
        source_id: &str,
        url: &str,
        title: Option<&str>,
    ) -> StorageResult<ParentItem> {
        let row: ParentRow = sqlx::query_as(include_str!("../../queries/register_parent.sql"))
            .bind(source_id)
            .bind(url)
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_parent(&self, source_id: &str, url: &str) -> StorageResult<ParentItem> {
        let row: Option<ParentRow> = sqlx::query_as(include_str!("../../queries/get_parent.sql"))
            .bind(source_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StorageError::not_found(format!("parent item ({source_id}, {url})")))?
            .try_into()
    }

    async fn get_parent_by_id(&self, parent_id: i64) -> StorageResult<ParentItem> {
        let row: Option<ParentRow> =
            sqlx::query_as(include_str!("../../queries/get_parent_by_id.sql"))
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or_else(|| StorageError::not_found(format!("parent item {parent_id}")))?
            .try_into()
    }

    async fn list_parents(&self) -> StorageResult<Vec<ParentItem>> {
        let rows: Vec<ParentRow> = sqlx::query_as(include_str!("../../queries/list_parents.sql"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ParentItem::try_from).collect()
    }

    async fn update_parent_details(
        &self,
        parent_id: i64,
        title: Option<&str>,
        details: &ParentDetails,
    ) -> StorageResult<()> {
        let genres = (!details.genres.is_empty())
            .then(|| serde_json::to_string(&details.genres))
            .transpose()
            .map_err(StorageError::io)?;
        let result = sqlx::query(include_str!("../../queries/update_parent_details.sql"))
            .bind(parent_id)
            .bind(title)
            .bind(details.author.as_deref())
            .bind(details.description.as_deref())
            .bind(details.cover_image_url.as_deref())
            .bind(details.is_completed)
            .bind(details.rating)
            .bind(genres)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("parent item {parent_id}")));
        }
        Ok(())
    }

    async fn list_chapter_urls(&self, parent_id: i64) -> StorageResult<HashSet<String>> {
        let urls: Vec<String> =
            sqlx::query_scalar(include_str!("../../queries/list_chapter_urls.sql"))
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(urls.into_iter().collect())
    }

    async fn list_unfetched_urls(&self, parent_id: i64) -> StorageResult<HashSet<String>> {
        let urls: Vec<String> =
            sqlx::query_scalar(include_str!("../../queries/list_unfetched_urls.sql"))
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(urls.into_iter().collect())
    }

    async fn list_chapters(&self, parent_id: i64) -> StorageResult<Vec<ChapterRecord>> {
        let rows: Vec<ChapterRow> = sqlx::query_as(include_str!("../../queries/list_chapters.sql"))
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ChapterRecord::try_from).collect()
    }

    async fn upsert_chapter(
        &self,
        parent_id: i64,
        url: &str,
        title: &str,
        sequence_number: u32,
    ) -> StorageResult<ChapterRecord> {
        let row: ChapterRow = sqlx::query_as(include_str!("../../queries/upsert_chapter.sql"))
            .bind(parent_id)
            .bind(url)
            .bind(title)
            .bind(i64::from(sequence_number))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match StorageError::from(e) {
                // Foreign key violation: the parent does not exist.
                StorageError::Conflict(_) => {
                    StorageError::not_found(format!("parent item {parent_id}"))
                }
                other => other,
            })?;
        row.try_into()
    }

    async fn update_chapter_content(&self, chapter_id: i64, content: &str) -> StorageResult<()> {
        let result = sqlx::query(include_str!("../../queries/update_chapter_content.sql"))
            .bind(chapter_id)
            .bind(content)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("chapter {chapter_id}")));
        }
        Ok(())
    }

    async fn mark_chapter_failed(&self, chapter_id: i64) -> StorageResult<()> {
        let result = sqlx::query(include_str!("../../queries/mark_chapter_failed.sql"))
            .bind(chapter_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            let exists: i64 = sqlx::query_scalar(include_str!("../../queries/chapter_exists.sql"))
                .bind(chapter_id)
                .fetch_one(&self.pool)
                .await?;
            if exists == 0 {
                return Err(StorageError::not_found(format!("chapter {chapter_id}")));
            }
        }
        Ok(())
    }

    async fn update_watermarks(
        &self,
        parent_id: i64,
        observed_max: u32,
        stored_max: u32,
    ) -> StorageResult<()> {
        let current = self.get_parent_by_id(parent_id).await?;
        warn_backward_watermarks(
            parent_id,
            (current.observed_remote_max_sequence, current.stored_max_sequence),
            (observed_max, stored_max),
        );
        let result = sqlx::query(include_str!("../../queries/update_watermarks.sql"))
            .bind(parent_id)
            .bind(i64::from(observed_max))
            .bind(i64::from(stored_max))
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("parent item {parent_id}")));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ParentRow {
    id: i64,
    source_id: String,
    url: String,
    title: Option<String>,
    observed_max_sequence: i64,
    stored_max_sequence: i64,
    last_synced_at: Option<i64>,
    author: Option<String>,
    description: Option<String>,
    cover_image_url: Option<String>,
    is_completed: Option<bool>,
    rating: Option<f64>,
    genres: Option<String>,
}

impl TryFrom<ParentRow> for ParentItem {
    type Error = StorageError;

    fn try_from(row: ParentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            source_id: row.source_id,
            url: row.url,
            title: row.title,
            observed_remote_max_sequence: sequence("observed_max_sequence", row.observed_max_sequence)?,
            stored_max_sequence: sequence("stored_max_sequence", row.stored_max_sequence)?,
            last_synced_at: row.last_synced_at.map(timestamp).transpose()?,
            details: ParentDetails {
                author: row.author,
                description: row.description,
                cover_image_url: row.cover_image_url,
                is_completed: row.is_completed,
                rating: row.rating,
                genres: decode_genres(row.genres)?,
            },
        })
    }
}

fn decode_genres(raw: Option<String>) -> StorageResult<Vec<String>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| StorageError::io(format!("invalid genres column: {e}"))),
    }
}

#[derive(sqlx::FromRow)]
struct ChapterRow {
    id: i64,
    parent_id: i64,
    url: String,
    title: String,
    sequence_number: i64,
    content: Option<String>,
    fetch_state: String,
    content_updated_at: Option<i64>,
}

impl TryFrom<ChapterRow> for ChapterRecord {
    type Error = StorageError;

    fn try_from(row: ChapterRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            parent_id: row.parent_id,
            url: row.url,
            title: row.title,
            sequence_number: sequence("sequence_number", row.sequence_number)?,
            content: row.content,
            fetch_state: row
                .fetch_state
                .parse::<FetchState>()
                .map_err(StorageError::io)?,
            content_updated_at: row.content_updated_at.map(timestamp).transpose()?,
        })
    }
}

fn sequence(column: &str, value: i64) -> StorageResult<u32> {
    u32::try_from(value).map_err(|_| StorageError::io(format!("invalid {column}: {value}")))
}

fn timestamp(secs: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| StorageError::io(format!("invalid timestamp: {secs}")))
}
