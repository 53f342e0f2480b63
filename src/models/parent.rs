//! Tracked parent items (novels).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ChapterListing;

/// A tracked serialized work whose chapters are discovered incrementally.
///
/// `(source_id, url)` identifies the item. The two watermarks only move
/// forward, and after any completed pass
/// `stored_max_sequence <= observed_remote_max_sequence`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentItem {
    pub id: i64,

    /// Source adapter that knows how to read this item
    pub source_id: String,

    /// Canonical URL of the item's main page
    pub url: String,

    pub title: Option<String>,

    /// Highest sequence number seen in the most recent remote listing
    pub observed_remote_max_sequence: u32,

    /// Highest sequence number whose content is persisted
    pub stored_max_sequence: u32,

    pub last_synced_at: Option<DateTime<Utc>>,

    /// Descriptive metadata refreshed by passes on sources that expose it
    #[serde(default)]
    pub details: ParentDetails,
}

impl ParentItem {
    /// Human-readable label for log lines.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// Descriptive metadata of a parent item as shown on its main page.
///
/// Every field is optional; a refresh only overwrites fields the page
/// actually provided.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParentDetails {
    pub author: Option<String>,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub is_completed: Option<bool>,
    pub rating: Option<f64>,
    /// Genre names, sorted and deduplicated case-insensitively
    #[serde(default)]
    pub genres: Vec<String>,
}

impl ParentDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay the fields present in `fresh` onto `self`.
    pub fn merge(&mut self, fresh: &ParentDetails) {
        if fresh.author.is_some() {
            self.author.clone_from(&fresh.author);
        }
        if fresh.description.is_some() {
            self.description.clone_from(&fresh.description);
        }
        if fresh.cover_image_url.is_some() {
            self.cover_image_url.clone_from(&fresh.cover_image_url);
        }
        if fresh.is_completed.is_some() {
            self.is_completed = fresh.is_completed;
        }
        if fresh.rating.is_some() {
            self.rating = fresh.rating;
        }
        if !fresh.genres.is_empty() {
            self.genres.clone_from(&fresh.genres);
        }
    }

    /// Sort genre names and drop case-insensitive duplicates.
    pub fn normalize_genres(genres: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for genre in genres {
            let genre = genre.trim().to_string();
            if genre.is_empty() || out.iter().any(|g| g.eq_ignore_ascii_case(&genre)) {
                continue;
            }
            out.push(genre);
        }
        out.sort_by_key(|g| g.to_lowercase());
        out
    }
}

/// Everything read from a parent item's main page in one download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParentPage {
    pub chapters: Vec<ChapterListing>,
    pub title: Option<String>,
    pub details: Option<ParentDetails>,
}

impl ParentPage {
    pub fn from_chapters(chapters: Vec<ChapterListing>) -> Self {
        Self {
            chapters,
            ..Self::default()
        }
    }
}
