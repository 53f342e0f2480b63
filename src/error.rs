// src/error.rs

//! Unified error handling for the synchronization engine.
//!
//! `AppError` is what pass-level operations return. The narrower
//! `ListingError`, `ContentError` and `StorageError` describe failures of the
//! two external capabilities (source adapters and the catalog store).

use std::fmt;

use thiserror::Error;

/// Result type alias for pass-level operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote chapter listing could not be obtained
    #[error("Listing failed: {0}")]
    Listing(#[from] ListingError),

    /// The catalog store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No adapter is registered for the parent item's source
    #[error("No source adapter registered for '{0}'")]
    UnknownSource(String),

    /// Another pass already holds the lease for this parent item
    #[error("A pass is already running for parent item {0}")]
    PassInProgress(i64),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Failure of a source adapter's listing operation.
///
/// Any listing failure is fatal for the pass: nothing is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    #[error("network failure while listing {url}: {message}")]
    Network { url: String, message: String },

    #[error("could not parse listing at {url}: {message}")]
    Parse { url: String, message: String },

    #[error("listing not found at {url}")]
    NotFound { url: String },

    #[error("source '{source_id}' has no way to discover parent items")]
    Unsupported { source_id: String },
}

impl ListingError {
    pub fn network(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    pub fn unsupported(source_id: impl Into<String>) -> Self {
        Self::Unsupported {
            source_id: source_id.into(),
        }
    }
}

/// Failure of a single chapter content fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("timed out")]
    Timeout,

    #[error("rate limited by source")]
    RateLimited,

    #[error("chapter not found")]
    NotFound,

    #[error("could not extract content: {0}")]
    Parse(String),
}

impl ContentError {
    /// Returns `true` if retrying the same fetch might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::RateLimited)
    }
}

/// Failure of the catalog store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn io(message: impl fmt::Display) -> Self {
        Self::Io(message.to_string())
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_check_violation() || db.is_foreign_key_violation() =>
            {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Io(format!("migration failed: {err}"))
    }
}
