//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings shared by every source adapter
    #[serde(default)]
    pub http: HttpConfig,

    /// Pass scheduling: concurrency, politeness and retry
    #[serde(default)]
    pub sync: SyncConfig,

    /// Catalog database location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log filter used by the CLI
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-source extraction rules
    #[serde(default = "defaults::sources")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        self.sync.validate()?;
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(AppError::validation("source id is empty"));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(AppError::validation(format!(
                    "source '{}' is defined twice",
                    source.id
                )));
            }
            for selector in [
                &source.chapter_row_selector,
                &source.chapter_link_selector,
                &source.content_selector,
            ] {
                scraper::Selector::parse(selector)
                    .map_err(|e| AppError::selector(selector.as_str(), format!("{e:?}")))?;
            }
            if let Some(details) = &source.details {
                for rule in details.rules() {
                    scraper::Selector::parse(&rule.selector)
                        .map_err(|e| AppError::selector(rule.selector.as_str(), format!("{e:?}")))?;
                }
            }
            for (name, pattern) in [
                ("sequence_pattern", &source.sequence_pattern),
                ("parent_url_pattern", &source.parent_url_pattern),
            ] {
                if let Some(pattern) = pattern {
                    regex::Regex::new(pattern).map_err(|e| {
                        AppError::validation(format!(
                            "source '{}' has an invalid {name}: {e}",
                            source.id
                        ))
                    })?;
                }
            }
            if let Some(sitemap) = &source.sitemap_url {
                url::Url::parse(sitemap)?;
                if source.parent_url_pattern.is_none() {
                    return Err(AppError::validation(format!(
                        "source '{}' has a sitemap_url but no parent_url_pattern",
                        source.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Find the extraction rules for a source.
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            sources: defaults::sources(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Scheduling knobs for a synchronization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Simultaneous content fetches within one pass
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum delay between two dispatches to the same source, in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Attempts per chapter, including the first one
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles on every retry
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for the backoff delay in milliseconds
    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Upper bound for a single content fetch in seconds
    #[serde(default = "defaults::fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Parent items synchronized at the same time by the batch runner
    #[serde(default = "defaults::max_parallel_items")]
    pub max_parallel_items: usize,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(AppError::validation("sync.max_concurrent must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(AppError::validation("sync.max_attempts must be > 0"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(AppError::validation(
                "sync.backoff_max_ms must be >= sync.backoff_base_ms",
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(AppError::validation("sync.fetch_timeout_secs must be > 0"));
        }
        if self.max_parallel_items == 0 {
            return Err(AppError::validation("sync.max_parallel_items must be > 0"));
        }
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            request_delay_ms: defaults::request_delay(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            fetch_timeout_secs: defaults::fetch_timeout(),
            max_parallel_items: defaults::max_parallel_items(),
        }
    }
}

/// Catalog database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file, created on first use
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `env_logger` filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// Extraction rules for one source website.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Identifier stored on every parent item of this source
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Selector for each entry of the chapter list on the parent page
    pub chapter_row_selector: String,

    /// Selector for the link element within an entry
    #[serde(default = "defaults::link_selector")]
    pub chapter_link_selector: String,

    /// Selector for the chapter body on the chapter page
    pub content_selector: String,

    /// HTML attribute holding the chapter URL
    #[serde(default = "defaults::link_attr")]
    pub link_attr: String,

    /// Regex whose first capture group is the chapter number in a title.
    /// Entries without a match are numbered by their listing position.
    #[serde(default = "defaults::sequence_pattern")]
    pub sequence_pattern: Option<String>,

    /// Sitemap listing the site's parent items, used by discovery
    #[serde(default)]
    pub sitemap_url: Option<String>,

    /// Regex a sitemap URL must match to count as a parent item
    #[serde(default)]
    pub parent_url_pattern: Option<String>,

    /// Rules for the metadata shown on a parent item's page
    #[serde(default)]
    pub details: Option<DetailRules>,
}

/// Where to find one metadata field on a page.
///
/// The first element matching `selector` is used: its `attr` value when
/// set, otherwise its text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldRule {
    pub selector: String,
    #[serde(default)]
    pub attr: Option<String>,
}

impl FieldRule {
    pub fn text(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: None,
        }
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
        }
    }
}

/// Metadata rules for a parent item's page. Missing rules are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailRules {
    pub title: Option<FieldRule>,
    pub author: Option<FieldRule>,
    pub description: Option<FieldRule>,
    pub cover_image: Option<FieldRule>,
    /// Publication status; "completed", "complete" or "finished" mark the item done
    pub status: Option<FieldRule>,
    pub rating: Option<FieldRule>,
    /// Every match is one genre
    pub genres: Option<FieldRule>,
}

impl DetailRules {
    pub fn rules(&self) -> impl Iterator<Item = &FieldRule> {
        [
            &self.title,
            &self.author,
            &self.description,
            &self.cover_image,
            &self.status,
            &self.rating,
            &self.genres,
        ]
        .into_iter()
        .flatten()
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::{DetailRules, FieldRule, SourceConfig};

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; chapter-sync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Sync defaults
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        500
    }
    pub fn backoff_max() -> u64 {
        8_000
    }
    pub fn fetch_timeout() -> u64 {
        60
    }
    pub fn max_parallel_items() -> usize {
        2
    }

    // Storage and logging defaults
    pub fn database_path() -> PathBuf {
        PathBuf::from("data/catalog.db")
    }
    pub fn log_level() -> String {
        "info".into()
    }

    // Source defaults
    pub fn link_selector() -> String {
        "a".into()
    }
    pub fn link_attr() -> String {
        "href".into()
    }
    pub fn sequence_pattern() -> Option<String> {
        Some(r"(?i)chapter\s*(\d+)".into())
    }
    pub fn sources() -> Vec<SourceConfig> {
        vec![SourceConfig {
            id: "novlove".to_string(),
            name: "NovLove".to_string(),
            chapter_row_selector: "#tab-chapters ul.list-chapter > li".to_string(),
            chapter_link_selector: link_selector(),
            content_selector: "#chr-content".to_string(),
            link_attr: link_attr(),
            sequence_pattern: sequence_pattern(),
            sitemap_url: Some("https://novlove.com/sitemap-0.xml".to_string()),
            parent_url_pattern: Some(r"^https://novlove\.com/novel/[^/?#]+/?$".to_string()),
            details: Some(novlove_details()),
        }]
    }
    fn novlove_details() -> DetailRules {
        DetailRules {
            title: Some(FieldRule::text("div.col-novel-main h3.title")),
            author: Some(FieldRule::attr(
                "span[itemprop='author'] meta[itemprop='name']",
                "content",
            )),
            description: Some(FieldRule::text("div.desc-text")),
            cover_image: Some(FieldRule::attr("meta[itemprop='image']", "content")),
            status: Some(FieldRule::attr("meta[property='og:novel:status']", "content")),
            rating: Some(FieldRule::attr("input#rateVal", "value")),
            genres: Some(FieldRule::text("ul.info.info-meta li a[href*='genres']")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.sync.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let mut config = Config::default();
        config.sync.backoff_base_ms = 10_000;
        config.sync.backoff_max_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_sources() {
        let mut config = Config::default();
        let first = config.sources[0].clone();
        config.sources.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_selector() {
        let mut config = Config::default();
        config.sources[0].content_selector = "[[invalid".to_string();
        assert!(matches!(
            config.validate(),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_detail_selector() {
        let mut config = Config::default();
        if let Some(details) = config.sources[0].details.as_mut() {
            details.rating = Some(FieldRule::attr("input##", "value"));
        }
        assert!(matches!(
            config.validate(),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn validate_requires_pattern_with_sitemap() {
        let mut config = Config::default();
        config.sources[0].parent_url_pattern = None;
        assert!(config.validate().is_err());

        config.sources[0].sitemap_url = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            max_concurrent = 8

            [[sources]]
            id = "example"
            chapter_row_selector = "ul.chapters li"
            content_selector = "div.text"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.max_concurrent, 8);
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].link_attr, "href");
        assert!(config.sources[0].sequence_pattern.is_some());
        assert!(config.sources[0].details.is_none());
        assert!(config.sources[0].sitemap_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn detail_rules_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [[sources]]
            id = "example"
            chapter_row_selector = "ul.chapters li"
            content_selector = "div.text"

            [sources.details]
            title = { selector = "h1" }
            rating = { selector = "span.score", attr = "data-value" }
            "#,
        )
        .unwrap();

        let details = config.sources[0].details.as_ref().unwrap();
        assert_eq!(details.title, Some(FieldRule::text("h1")));
        assert_eq!(details.rating, Some(FieldRule::attr("span.score", "data-value")));
        assert!(details.author.is_none());
        assert_eq!(details.rules().count(), 2);
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.request_delay(), Duration::from_millis(500));
        let novlove = config.source("novlove").unwrap();
        assert_eq!(novlove.content_selector, "#chr-content");
        assert!(novlove.sitemap_url.is_some());
        assert!(novlove.details.as_ref().is_some_and(|d| d.genres.is_some()));
    }

    #[test]
    fn load_or_default_survives_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(tmp.path().join("missing.toml"));
        assert_eq!(config.sync.max_concurrent, 4);
        assert!(config.source("novlove").is_some());
    }
}
