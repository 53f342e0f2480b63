//! Delta resolution between a remote listing and the catalog.
//!
//! Classifies every listing entry against what is already stored and decides
//! which chapters the pass has to fetch. Pure: reads nothing, writes nothing.

use std::collections::HashSet;

use crate::models::ChapterListing;

/// How a listing entry relates to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Never stored
    New,
    /// Stored, content still missing
    Retry,
    /// Stored with content
    Unchanged,
    /// Part of a listing that regressed below the observed watermark
    Conflicting,
}

/// A deduplicated listing entry and its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub listing: ChapterListing,
    pub class: Classification,
}

/// Result of resolving one listing.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Deduplicated entries in listing order
    pub entries: Vec<ResolvedEntry>,
    /// New and Retry entries, ascending by sequence number
    pub work: Vec<ChapterListing>,
    pub observed_remote_max: u32,
    pub conflict: bool,
}

impl Resolution {
    pub fn count(&self, class: Classification) -> usize {
        self.entries.iter().filter(|e| e.class == class).count()
    }

    pub fn has_work(&self) -> bool {
        !self.work.is_empty()
    }
}

/// Resolve a listing against the stored chapter URLs of its parent item.
///
/// `unfetched` is the subset of `stored` whose content is still missing.
pub fn resolve(
    listing: &[ChapterListing],
    stored: &HashSet<String>,
    unfetched: &HashSet<String>,
    previous_observed_max: u32,
) -> Resolution {
    let mut seen = HashSet::new();
    let deduped: Vec<&ChapterListing> = listing
        .iter()
        .filter(|entry| seen.insert(entry.url.as_str()))
        .collect();

    if deduped.len() < listing.len() {
        log::debug!(
            "Dropped {} duplicate listing entr(ies)",
            listing.len() - deduped.len()
        );
    }

    let Some(listing_max) = deduped.iter().map(|e| e.sequence_number).max() else {
        return Resolution {
            observed_remote_max: previous_observed_max,
            ..Resolution::default()
        };
    };

    if listing_max < previous_observed_max {
        log::warn!(
            "Listing regressed: max sequence {} is below the observed {}; freezing watermarks",
            listing_max,
            previous_observed_max
        );
        return Resolution {
            entries: deduped
                .into_iter()
                .map(|listing| ResolvedEntry {
                    listing: listing.clone(),
                    class: Classification::Conflicting,
                })
                .collect(),
            work: Vec::new(),
            observed_remote_max: previous_observed_max,
            conflict: true,
        };
    }

    let entries: Vec<ResolvedEntry> = deduped
        .into_iter()
        .map(|listing| {
            let class = if !stored.contains(&listing.url) {
                Classification::New
            } else if unfetched.contains(&listing.url) {
                Classification::Retry
            } else {
                Classification::Unchanged
            };
            ResolvedEntry {
                listing: listing.clone(),
                class,
            }
        })
        .collect();

    let mut work: Vec<ChapterListing> = entries
        .iter()
        .filter(|e| matches!(e.class, Classification::New | Classification::Retry))
        .map(|e| e.listing.clone())
        .collect();
    // Stable: equal sequence numbers keep listing order.
    work.sort_by_key(|l| l.sequence_number);

    Resolution {
        entries,
        work,
        observed_remote_max: listing_max,
        conflict: false,
    }
}
