//! Synchronization pipeline.
//!
//! - `resolve`: classify a remote listing against the catalog
//! - `fetch`: fetch the work-list with concurrency, politeness and retry
//! - `sync`: one pass for one parent item
//! - `batch`: passes for many parent items
//! - `discover`: register the parent items a source advertises

pub mod batch;
pub mod discover;
pub mod fetch;
pub mod lease;
pub mod resolve;
pub mod retry;
pub mod sync;
pub mod throttle;

pub use batch::{BatchOutcome, run_all, run_batch};
pub use discover::{DiscoveryReport, discover};
pub use sync::SyncOrchestrator;
