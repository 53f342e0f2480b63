// src/models/mod.rs

//! Domain models for the synchronization engine.
//!
//! This module contains the data structures shared by the source adapters,
//! the catalog store and the pipeline, organized by their primary purpose.

mod chapter;
mod config;
mod parent;
mod report;

// Re-export all public types
pub use chapter::{ChapterListing, ChapterRecord, FetchState};
pub use config::{
    Config, DetailRules, FieldRule, HttpConfig, LoggingConfig, SourceConfig, StorageConfig,
    SyncConfig,
};
pub use parent::{ParentDetails, ParentItem, ParentPage};
pub use report::{PassState, RunReport};
