//! Bounded retry with exponential backoff.

use std::time::Duration;

use crate::error::ContentError;
use crate::models::SyncConfig;

/// Attempt budget and backoff curve for one chapter fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }

    /// Whether a failure on attempt number `attempt` earns another try.
    pub fn should_retry(&self, attempt: u32, err: &ContentError) -> bool {
        err.is_transient() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
