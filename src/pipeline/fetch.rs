//! Fetch scheduling for one pass.
//!
//! Runs the work-list through the source adapter with bounded concurrency,
//! the source's politeness throttle, a per-fetch timeout and bounded retry.
//! Returns one outcome per dispatched chapter and never touches the catalog.

use std::time::Duration;

use futures::future;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::ContentError;
use crate::models::{ChapterListing, SyncConfig};
use crate::pipeline::retry::RetryPolicy;
use crate::sources::RegisteredSource;

/// Final result of one chapter's fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Fetched(String),
    Failed(ContentError),
}

/// Outcome of one dispatched chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub url: String,
    pub sequence_number: u32,
    /// Attempts made, including the first one
    pub attempts: u32,
    pub result: FetchResult,
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self.result, FetchResult::Fetched(_))
    }
}

/// Everything the scheduler produced for a work-list.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// In completion order
    pub outcomes: Vec<FetchOutcome>,
    /// Cancellation left part of the work-list undispatched
    pub cancelled: bool,
}

impl FetchReport {
    pub fn fetched_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_fetched()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.fetched_count()
    }

    /// Highest sequence number whose content was obtained.
    pub fn max_fetched_sequence(&self) -> Option<u32> {
        self.outcomes
            .iter()
            .filter(|o| o.is_fetched())
            .map(|o| o.sequence_number)
            .max()
    }
}

/// Dispatches content fetches for a pass.
#[derive(Debug, Clone)]
pub struct FetchScheduler {
    max_concurrent: usize,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

impl FetchScheduler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            fetch_timeout: config.fetch_timeout(),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Fetch every chapter of the work-list.
    ///
    /// Cancellation is checked before each dispatch; fetches already in
    /// flight run to completion, but are not retried.
    pub async fn run(
        &self,
        source: &RegisteredSource,
        work: Vec<ChapterListing>,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let total = work.len();
        let outcomes: Vec<FetchOutcome> = stream::iter(work)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|listing| self.fetch_one(source, listing, cancel))
            .buffer_unordered(self.max_concurrent)
            .filter_map(future::ready)
            .collect()
            .await;

        let cancelled = outcomes.len() < total;
        if cancelled {
            log::info!(
                "Cancelled after dispatching {} of {} chapter(s)",
                outcomes.len(),
                total
            );
        }
        FetchReport {
            outcomes,
            cancelled,
        }
    }

    /// Fetch one chapter with retry. `None` if cancelled before the first attempt.
    async fn fetch_one(
        &self,
        source: &RegisteredSource,
        listing: ChapterListing,
        cancel: &CancellationToken,
    ) -> Option<FetchOutcome> {
        let mut attempts = 0;
        let result = loop {
            source.throttle.wait().await;
            if attempts == 0 && cancel.is_cancelled() {
                return None;
            }
            attempts += 1;

            let result = tokio::time::timeout(
                self.fetch_timeout,
                source.adapter.fetch_content(&listing.url),
            )
            .await
            .unwrap_or(Err(ContentError::Timeout));

            let err = match result {
                Ok(content) => break FetchResult::Fetched(content),
                Err(err) => err,
            };
            if !self.retry.should_retry(attempts, &err) || cancel.is_cancelled() {
                log::warn!(
                    "Giving up on {} after {} attempt(s): {}",
                    listing.url,
                    attempts,
                    err
                );
                break FetchResult::Failed(err);
            }

            let delay = self.retry.backoff(attempts);
            log::debug!(
                "Attempt {} for {} failed ({}); retrying in {:?}",
                attempts,
                listing.url,
                err,
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break FetchResult::Failed(err),
            }
        };

        Some(FetchOutcome {
            url: listing.url,
            sequence_number: listing.sequence_number,
            attempts,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::pipeline::throttle::Throttle;
    use crate::sources::scripted::{ScriptedSource, chapter_url, chapters};

    fn config(max_concurrent: usize) -> SyncConfig {
        SyncConfig {
            max_concurrent,
            request_delay_ms: 0,
            max_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            fetch_timeout_secs: 5,
            ..SyncConfig::default()
        }
    }

    fn registered(source: &Arc<ScriptedSource>, delay: Duration) -> RegisteredSource {
        RegisteredSource {
            adapter: source.clone(),
            throttle: Arc::new(Throttle::new(delay)),
        }
    }

    fn outcome<'a>(report: &'a FetchReport, n: u32) -> &'a FetchOutcome {
        report
            .outcomes
            .iter()
            .find(|o| o.sequence_number == n)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let source = Arc::new(ScriptedSource::new("demo"));
        source.script(&chapter_url(2), vec![Err(ContentError::NotFound)]);
        source.script(&chapter_url(4), vec![Err(ContentError::Parse("empty".into()))]);

        let scheduler = FetchScheduler::new(&config(2));
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=5), &CancellationToken::new())
            .await;

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.fetched_count(), 3);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.max_fetched_sequence(), Some(5));
        assert!(!report.cancelled);
        assert_eq!(
            outcome(&report, 1).result,
            FetchResult::Fetched(format!("Text of {}", chapter_url(1)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_with_backoff() {
        let source = Arc::new(ScriptedSource::new("demo"));
        source.script(
            &chapter_url(1),
            vec![
                Err(ContentError::RateLimited),
                Err(ContentError::Network("reset".into())),
                Ok("finally".into()),
            ],
        );

        let scheduler = FetchScheduler::new(&config(1));
        let start = Instant::now();
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=1), &CancellationToken::new())
            .await;

        let only = outcome(&report, 1);
        assert_eq!(only.attempts, 3);
        assert_eq!(only.result, FetchResult::Fetched("finally".into()));
        // 100 ms after the first failure, 200 ms after the second.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let source = Arc::new(ScriptedSource::new("demo"));
        source.script(&chapter_url(1), vec![Err(ContentError::Timeout)]);

        let scheduler = FetchScheduler::new(&config(1));
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=1), &CancellationToken::new())
            .await;

        let only = outcome(&report, 1);
        assert_eq!(only.attempts, 3);
        assert_eq!(only.result, FetchResult::Failed(ContentError::Timeout));
        assert_eq!(source.fetch_count(&chapter_url(1)), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let source = Arc::new(ScriptedSource::new("demo"));
        source.script(&chapter_url(1), vec![Err(ContentError::NotFound)]);

        let scheduler = FetchScheduler::new(&config(1));
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=1), &CancellationToken::new())
            .await;

        assert_eq!(outcome(&report, 1).attempts, 1);
        assert_eq!(source.fetch_count(&chapter_url(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let source = Arc::new(ScriptedSource::new("demo").with_fetch_delay(Duration::from_secs(10)));

        let scheduler = FetchScheduler::new(&SyncConfig {
            max_attempts: 1,
            ..config(1)
        });
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=1), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome(&report, 1).result,
            FetchResult::Failed(ContentError::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let source =
            Arc::new(ScriptedSource::new("demo").with_fetch_delay(Duration::from_millis(50)));

        let scheduler = FetchScheduler::new(&config(3));
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=12), &CancellationToken::new())
            .await;

        assert_eq!(report.fetched_count(), 12);
        assert!(source.max_in_flight() <= 3);
        assert!(source.max_in_flight() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_politeness_delay_spaces_dispatches() {
        let source = Arc::new(ScriptedSource::new("demo"));

        let scheduler = FetchScheduler::new(&config(4));
        let start = Instant::now();
        scheduler
            .run(
                &registered(&source, Duration::from_millis(500)),
                chapters(1..=4),
                &CancellationToken::new(),
            )
            .await;

        assert!(start.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(source.total_fetches(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let source = Arc::new(ScriptedSource::new("demo"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let scheduler = FetchScheduler::new(&config(2));
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=3), &cancel)
            .await;

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(source.total_fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_pass_lets_in_flight_finish() {
        let source =
            Arc::new(ScriptedSource::new("demo").with_fetch_delay(Duration::from_millis(100)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let scheduler = FetchScheduler::new(&config(1));
        let report = scheduler
            .run(&registered(&source, Duration::ZERO), chapters(1..=10), &cancel)
            .await;

        assert!(report.cancelled);
        // Chapter 1 finished at 100 ms, chapter 2 was in flight at 150 ms.
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.fetched_count(), 2);
        assert_eq!(source.total_fetches(), 2);
    }
}
