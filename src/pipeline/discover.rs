//! Registration of the parent items a source advertises.

use crate::error::{Result, StorageError};
use crate::sources::SourceRegistry;
use crate::storage::CatalogStore;

/// Counts from one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub source_id: String,
    /// Parent item URLs the source advertised
    pub found: usize,
    /// Of those, newly registered in the catalog
    pub registered: usize,
    pub already_tracked: usize,
}

/// Register every parent item the source advertises that is not tracked yet.
///
/// Registration is idempotent, so running discovery again only adds what
/// appeared since. Existing items keep their watermarks and metadata.
pub async fn discover(
    store: &dyn CatalogStore,
    sources: &SourceRegistry,
    source_id: &str,
) -> Result<DiscoveryReport> {
    let source = sources.get(source_id)?;
    source.throttle.wait().await;
    let urls = source.adapter.discover_parents().await?;

    let mut report = DiscoveryReport {
        source_id: source_id.to_string(),
        found: urls.len(),
        ..DiscoveryReport::default()
    };
    for url in &urls {
        match store.get_parent(source_id, url).await {
            Ok(_) => report.already_tracked += 1,
            Err(StorageError::NotFound(_)) => {
                let parent = store.register_parent(source_id, url, None).await?;
                log::debug!("Tracking parent {}: {}", parent.id, url);
                report.registered += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    log::info!(
        "{}: {} parent item(s) found, {} new, {} already tracked",
        source_id,
        report.found,
        report.registered,
        report.already_tracked
    );
    Ok(report)
}
