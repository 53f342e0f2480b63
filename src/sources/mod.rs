//! Source adapters: the only code that talks to a remote site.
//!
//! Each site is reached through one [`SourceAdapter`], picked by the parent
//! item's `source_id` through the [`SourceRegistry`]. The core never branches
//! on a concrete source.

pub mod html;
#[cfg(test)]
pub(crate) mod scripted;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, ContentError, ListingError, Result};
use crate::models::{ChapterListing, Config, ParentPage};
use crate::pipeline::throttle::Throttle;
use crate::utils::http::create_async_client;

pub use html::HtmlSource;

/// Capability set of a chapter source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Identifier matching `ParentItem::source_id`.
    fn source_id(&self) -> &str;

    /// Chapter listing of a parent item, in the order the site delivers it.
    async fn list_chapters(&self, parent_url: &str)
    -> std::result::Result<Vec<ChapterListing>, ListingError>;

    /// Body text of one chapter.
    async fn fetch_content(&self, chapter_url: &str) -> std::result::Result<String, ContentError>;

    /// Chapter listing plus whatever metadata the same page carries.
    async fn read_parent(&self, parent_url: &str) -> std::result::Result<ParentPage, ListingError> {
        let chapters = self.list_chapters(parent_url).await?;
        Ok(ParentPage::from_chapters(chapters))
    }

    /// URLs of the parent items the site advertises.
    async fn discover_parents(&self) -> std::result::Result<Vec<String>, ListingError> {
        Err(ListingError::unsupported(self.source_id()))
    }
}

/// An adapter together with the throttle shared by every pass on its site.
#[derive(Clone)]
pub struct RegisteredSource {
    pub adapter: Arc<dyn SourceAdapter>,
    pub throttle: Arc<Throttle>,
}

/// Lookup table from `source_id` to its adapter.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, RegisteredSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one [`HtmlSource`] per configured source, sharing one HTTP client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = create_async_client(&config.http)?;
        let mut registry = Self::new();
        for source in &config.sources {
            let adapter = HtmlSource::new(client.clone(), source)?;
            registry.register(Arc::new(adapter), config.sync.request_delay());
        }
        log::debug!("Registered {} source(s)", registry.sources.len());
        Ok(registry)
    }

    /// Register an adapter; a previous one with the same id is replaced.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, delay: Duration) {
        let id = adapter.source_id().to_string();
        let entry = RegisteredSource {
            adapter,
            throttle: Arc::new(Throttle::new(delay)),
        };
        if self.sources.insert(id.clone(), entry).is_some() {
            log::warn!("Source '{}' registered twice; keeping the last one", id);
        }
    }

    pub fn get(&self, source_id: &str) -> Result<&RegisteredSource> {
        self.sources
            .get(source_id)
            .ok_or_else(|| AppError::UnknownSource(source_id.to_string()))
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }
}
