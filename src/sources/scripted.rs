//! Scripted source adapter for tests.
//!
//! Serves a fixed listing and per-URL content results, and records how it
//! was called.

use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ContentError, ListingError};
use crate::models::{ChapterListing, ParentDetails, ParentPage};
use crate::sources::SourceAdapter;

pub(crate) fn chapter_url(n: u32) -> String {
    format!("https://example.com/c/{n}")
}

/// Listing entries `Chapter n` at [`chapter_url`] for every `n` in the range.
pub(crate) fn chapters(range: RangeInclusive<u32>) -> Vec<ChapterListing> {
    range
        .map(|n| ChapterListing::new(n, format!("Chapter {n}"), chapter_url(n)))
        .collect()
}

pub(crate) struct ScriptedSource {
    id: String,
    listing: Mutex<Result<Vec<ChapterListing>, ListingError>>,
    page_meta: Mutex<(Option<String>, Option<ParentDetails>)>,
    discovered: Mutex<Option<Vec<String>>>,
    // The last queued result of a URL repeats once the queue is drained.
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ContentError>>>>,
    fetch_delay: Duration,
    list_calls: AtomicUsize,
    fetch_calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            listing: Mutex::new(Ok(Vec::new())),
            page_meta: Mutex::new((None, None)),
            discovered: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            fetch_delay: Duration::ZERO,
            list_calls: AtomicUsize::new(0),
            fetch_calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_listing(self, listing: Vec<ChapterListing>) -> Self {
        self.set_listing(listing);
        self
    }

    /// Every fetch takes this long before answering.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn set_listing(&self, listing: Vec<ChapterListing>) {
        *self.listing.lock().unwrap() = Ok(listing);
    }

    /// Title and metadata served next to the listing.
    pub fn with_details(self, title: &str, details: ParentDetails) -> Self {
        *self.page_meta.lock().unwrap() = (Some(title.to_string()), Some(details));
        self
    }

    /// Parent URLs served by discovery; without them discovery is unsupported.
    pub fn with_discovered(self, urls: &[&str]) -> Self {
        *self.discovered.lock().unwrap() = Some(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn fail_listing(&self, err: ListingError) {
        *self.listing.lock().unwrap() = Err(err);
    }

    /// Queue results for a URL; the last one repeats.
    pub fn script(&self, url: &str, results: Vec<Result<String, ContentError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), results.into());
    }

    /// Drop any script for a URL so it serves default content again.
    pub fn clear_script(&self, url: &str) {
        self.scripts.lock().unwrap().remove(url);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetch_calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetch_calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_result(&self, url: &str) -> Result<String, ContentError> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Ok(format!("Text of {url}")),
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn list_chapters(&self, _parent_url: &str) -> Result<Vec<ChapterListing>, ListingError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.listing.lock().unwrap().clone()
    }

    async fn read_parent(&self, parent_url: &str) -> Result<ParentPage, ListingError> {
        let chapters = self.list_chapters(parent_url).await?;
        let (title, details) = self.page_meta.lock().unwrap().clone();
        Ok(ParentPage {
            chapters,
            title,
            details,
        })
    }

    async fn discover_parents(&self) -> Result<Vec<String>, ListingError> {
        self.discovered
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ListingError::unsupported(&self.id))
    }

    async fn fetch_content(&self, chapter_url: &str) -> Result<String, ContentError> {
        *self
            .fetch_calls
            .lock()
            .unwrap()
            .entry(chapter_url.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.next_result(chapter_url)
    }
}
