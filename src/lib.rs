// src/lib.rs

//! Chapter synchronization library
//!
//! Keeps a local catalog of tracked web novels (parent items) in step with
//! their source sites: each pass lists the remote chapters, resolves what is
//! new, fetches it politely and records the result with forward-only
//! watermarks.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod sources;
pub mod storage;
pub mod utils;
