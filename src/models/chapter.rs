//! Chapter data structures.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a remote chapter listing, as produced by a source adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterListing {
    pub sequence_number: u32,
    pub title: String,
    pub url: String,
}

impl ChapterListing {
    pub fn new(sequence_number: u32, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            sequence_number,
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Content state of a stored chapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    /// Known from a listing, content not fetched yet
    Pending,
    /// Content stored
    Fetched,
    /// Last fetch attempt failed; retried on the next pass
    Failed,
}

impl FetchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchState::Pending => "pending",
            FetchState::Fetched => "fetched",
            FetchState::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FetchState::Pending),
            "fetched" => Ok(FetchState::Fetched),
            "failed" => Ok(FetchState::Failed),
            other => Err(format!("unknown fetch state '{other}'")),
        }
    }
}

/// A chapter persisted in the catalog.
///
/// `(parent_id, url)` is unique. `sequence_number` is expected to be unique
/// per parent but sources renumber and duplicate, so nothing relies on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterRecord {
    pub id: i64,
    pub parent_id: i64,
    pub url: String,
    pub title: String,
    pub sequence_number: u32,
    /// `Some` whenever `fetch_state` is `Fetched`
    pub content: Option<String>,
    pub fetch_state: FetchState,
    pub content_updated_at: Option<DateTime<Utc>>,
}

impl ChapterRecord {
    pub fn is_fetched(&self) -> bool {
        self.fetch_state == FetchState::Fetched
    }
}
