//! Pass state machine and run report.

use std::fmt;

use serde::{Deserialize, Serialize};

/// States of a single synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassState {
    Listing,
    Resolving,
    Fetching,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassState::Listing => "LISTING",
            PassState::Resolving => "RESOLVING",
            PassState::Fetching => "FETCHING",
            PassState::Persisting => "PERSISTING",
            PassState::Done => "DONE",
            PassState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of one completed pass, for external logging and alerting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub parent_id: i64,

    /// Chapters whose content was fetched and stored during this pass
    pub new_chapters_count: usize,

    /// Chapters whose fetch failed during this pass
    pub failed_chapters_count: usize,

    /// Listing entries classified as never seen before
    pub discovered_count: usize,

    /// Stored chapters without content that were fetched again
    pub retried_count: usize,

    pub observed_max_sequence: u32,
    pub stored_max_sequence: u32,

    /// The listing regressed below the observed watermark; nothing was written
    pub had_conflict: bool,

    /// Cancellation stopped dispatching before the work-list was exhausted
    pub cancelled: bool,

    pub duration_ms: u64,
}

impl RunReport {
    /// Summary line used by the batch runner and the CLI.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "parent {}: {} fetched, {} failed ({} new, {} retried), observed max {}, stored max {}, {} ms",
            self.parent_id,
            self.new_chapters_count,
            self.failed_chapters_count,
            self.discovered_count,
            self.retried_count,
            self.observed_max_sequence,
            self.stored_max_sequence,
            self.duration_ms
        );
        if self.had_conflict {
            line.push_str(" [CONFLICT]");
        }
        if self.cancelled {
            line.push_str(" [CANCELLED]");
        }
        line
    }
}
