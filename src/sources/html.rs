// src/sources/html.rs

//! Selector-driven adapter for server-rendered chapter sites.
//!
//! Fetches pages with `reqwest` and extracts data with the CSS selectors of
//! one `[[sources]]` entry. Parsing happens in plain functions after the body
//! is downloaded, since `scraper::Html` cannot be held across an await.

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, ContentError, ListingError, Result};
use crate::models::{ChapterListing, DetailRules, FieldRule, ParentDetails, ParentPage, SourceConfig};
use crate::sources::SourceAdapter;
use crate::utils::{normalize_whitespace, parse_sequence, resolve_url};

/// Adapter for one site, configured by CSS selectors.
#[derive(Debug, Clone)]
pub struct HtmlSource {
    id: String,
    client: Client,
    row_selector: Selector,
    link_selector: Selector,
    content_selector: Selector,
    link_attr: String,
    sequence_pattern: Option<Regex>,
    details: Option<DetailExtractor>,
    discovery: Option<Discovery>,
}

/// Sitemap location and the filter for parent item URLs in it.
#[derive(Debug, Clone)]
struct Discovery {
    sitemap_url: String,
    parent_pattern: Regex,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    selector: Selector,
    attr: Option<String>,
}

impl CompiledRule {
    fn new(rule: &FieldRule) -> Result<Self> {
        Ok(Self {
            selector: parse_selector(&rule.selector)?,
            attr: rule.attr.clone(),
        })
    }

    fn value_of(&self, element: ElementRef<'_>) -> Option<String> {
        let value = match &self.attr {
            Some(attr) => normalize_whitespace(element.value().attr(attr)?),
            None => normalize_whitespace(&element.text().collect::<String>()),
        };
        (!value.is_empty()).then_some(value)
    }

    /// Value of the first matching element that has one.
    fn first(&self, document: &Html) -> Option<String> {
        document
            .select(&self.selector)
            .find_map(|element| self.value_of(element))
    }

    fn all(&self, document: &Html) -> Vec<String> {
        document
            .select(&self.selector)
            .filter_map(|element| self.value_of(element))
            .collect()
    }

    /// Multi-paragraph text of the first match; attributes are read as-is.
    fn block(&self, document: &Html) -> Option<String> {
        if self.attr.is_some() {
            return self.first(document);
        }
        let element = document.select(&self.selector).next()?;
        let text = extract_text(element);
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, Default)]
struct DetailExtractor {
    title: Option<CompiledRule>,
    author: Option<CompiledRule>,
    description: Option<CompiledRule>,
    cover_image: Option<CompiledRule>,
    status: Option<CompiledRule>,
    rating: Option<CompiledRule>,
    genres: Option<CompiledRule>,
}

impl DetailExtractor {
    fn new(rules: &DetailRules) -> Result<Self> {
        let compile = |rule: &Option<FieldRule>| rule.as_ref().map(CompiledRule::new).transpose();
        Ok(Self {
            title: compile(&rules.title)?,
            author: compile(&rules.author)?,
            description: compile(&rules.description)?,
            cover_image: compile(&rules.cover_image)?,
            status: compile(&rules.status)?,
            rating: compile(&rules.rating)?,
            genres: compile(&rules.genres)?,
        })
    }

    /// Title and metadata found on the page. Never fails: absent fields stay `None`.
    fn extract(&self, document: &Html, base: &Url) -> (Option<String>, ParentDetails) {
        let first = |rule: &Option<CompiledRule>| rule.as_ref().and_then(|r| r.first(document));

        let details = ParentDetails {
            author: first(&self.author),
            description: self.description.as_ref().and_then(|r| r.block(document)),
            cover_image_url: first(&self.cover_image).map(|href| resolve_url(base, &href)),
            is_completed: first(&self.status).map(|status| is_completed_status(&status)),
            rating: first(&self.rating).and_then(|value| parse_rating(&value)),
            genres: self
                .genres
                .as_ref()
                .map(|r| ParentDetails::normalize_genres(r.all(document)))
                .unwrap_or_default(),
        };
        (first(&self.title), details)
    }
}

impl HtmlSource {
    pub fn new(client: Client, config: &SourceConfig) -> Result<Self> {
        let pattern = |name: &str, value: &Option<String>| {
            value
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| {
                    AppError::config(format!(
                        "source '{}' has an invalid {name}: {e}",
                        config.id
                    ))
                })
        };
        let sequence_pattern = pattern("sequence_pattern", &config.sequence_pattern)?;
        let parent_pattern = pattern("parent_url_pattern", &config.parent_url_pattern)?;

        let discovery = match (&config.sitemap_url, parent_pattern) {
            (Some(sitemap_url), Some(parent_pattern)) => Some(Discovery {
                sitemap_url: sitemap_url.clone(),
                parent_pattern,
            }),
            (Some(_), None) => {
                return Err(AppError::config(format!(
                    "source '{}' has a sitemap_url but no parent_url_pattern",
                    config.id
                )));
            }
            (None, _) => None,
        };

        Ok(Self {
            id: config.id.clone(),
            client,
            row_selector: parse_selector(&config.chapter_row_selector)?,
            link_selector: parse_selector(&config.chapter_link_selector)?,
            content_selector: parse_selector(&config.content_selector)?,
            link_attr: config.link_attr.clone(),
            sequence_pattern,
            details: config.details.as_ref().map(DetailExtractor::new).transpose()?,
            discovery,
        })
    }

    async fn fetch_parent_page(&self, parent_url: &str) -> std::result::Result<(String, Url), ListingError> {
        let base = Url::parse(parent_url).map_err(|e| ListingError::parse(parent_url, e))?;
        let response = self
            .client
            .get(parent_url)
            .send()
            .await
            .map_err(|e| ListingError::network(parent_url, e))?;
        listing_status(parent_url, response.status())?;
        let body = response
            .text()
            .await
            .map_err(|e| ListingError::network(parent_url, e))?;
        Ok((body, base))
    }

    /// Extract chapter listing, title and metadata from a parent page.
    fn parse_page(&self, html: &str, base: &Url) -> std::result::Result<ParentPage, ListingError> {
        let document = Html::parse_document(html);
        let chapters = self.listing_from(&document, base)?;
        let (title, details) = match &self.details {
            Some(extractor) => {
                let (title, details) = extractor.extract(&document, base);
                (title, Some(details))
            }
            None => (None, None),
        };
        Ok(ParentPage {
            chapters,
            title,
            details,
        })
    }

    /// Rows without a usable link are skipped. A page where the row selector
    /// matches nothing is a parse failure, not an empty listing.
    fn listing_from(
        &self,
        document: &Html,
        base: &Url,
    ) -> std::result::Result<Vec<ChapterListing>, ListingError> {
        let mut rows = document.select(&self.row_selector).peekable();
        if rows.peek().is_none() {
            return Err(ListingError::parse(
                base.as_str(),
                "no chapter rows matched the row selector",
            ));
        }

        let mut listings = Vec::new();
        for row in rows {
            let Some(link) = row.select(&self.link_selector).next() else {
                continue;
            };
            let Some(href) = link
                .value()
                .attr(&self.link_attr)
                .map(str::trim)
                .filter(|h| !h.is_empty())
            else {
                continue;
            };

            let mut title = normalize_whitespace(&link.text().collect::<String>());
            if title.is_empty() {
                title = link
                    .value()
                    .attr("title")
                    .map(normalize_whitespace)
                    .unwrap_or_default();
            }

            // Listing position is the fallback when the title carries no number.
            let position = listings.len() as u32 + 1;
            let sequence_number = self
                .sequence_pattern
                .as_ref()
                .and_then(|pattern| parse_sequence(pattern, &title))
                .unwrap_or(position);

            listings.push(ChapterListing::new(
                sequence_number,
                title,
                resolve_url(base, href),
            ));
        }
        Ok(listings)
    }

    /// Extract the chapter body as newline-separated text blocks.
    fn parse_content(&self, html: &str) -> std::result::Result<String, ContentError> {
        let document = Html::parse_document(html);
        let body = document
            .select(&self.content_selector)
            .next()
            .ok_or_else(|| ContentError::Parse("content selector matched nothing".into()))?;

        let text = extract_text(body);
        if text.is_empty() {
            return Err(ContentError::Parse("chapter body is empty".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl SourceAdapter for HtmlSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn list_chapters(
        &self,
        parent_url: &str,
    ) -> std::result::Result<Vec<ChapterListing>, ListingError> {
        Ok(self.read_parent(parent_url).await?.chapters)
    }

    async fn read_parent(&self, parent_url: &str) -> std::result::Result<ParentPage, ListingError> {
        let (body, base) = self.fetch_parent_page(parent_url).await?;
        let page = self.parse_page(&body, &base)?;
        log::debug!(
            "{}: {} chapter(s) listed at {}",
            self.id,
            page.chapters.len(),
            parent_url
        );
        Ok(page)
    }

    async fn fetch_content(&self, chapter_url: &str) -> std::result::Result<String, ContentError> {
        let response = self
            .client
            .get(chapter_url)
            .send()
            .await
            .map_err(transport_error)?;
        content_status(response.status())?;
        let body = response.text().await.map_err(transport_error)?;
        self.parse_content(&body)
    }

    async fn discover_parents(&self) -> std::result::Result<Vec<String>, ListingError> {
        let Some(discovery) = &self.discovery else {
            return Err(ListingError::unsupported(&self.id));
        };
        let url = discovery.sitemap_url.as_str();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ListingError::network(url, e))?;
        listing_status(url, response.status())?;
        let body = response
            .text()
            .await
            .map_err(|e| ListingError::network(url, e))?;

        let urls = parse_sitemap(&body, &discovery.parent_pattern);
        log::debug!("{}: {} parent item(s) in sitemap {}", self.id, urls.len(), url);
        Ok(urls)
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// `<loc>` entries of a sitemap that match `pattern`, deduplicated in document order.
fn parse_sitemap(xml: &str, pattern: &Regex) -> Vec<String> {
    let document = Html::parse_document(xml);
    let Ok(loc) = Selector::parse("loc") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    document
        .select(&loc)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|url| pattern.is_match(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn is_completed_status(status: &str) -> bool {
    ["completed", "complete", "finished"]
        .iter()
        .any(|s| status.trim().eq_ignore_ascii_case(s))
}

fn parse_rating(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|r| r.is_finite())
}

fn extract_text(element: ElementRef<'_>) -> String {
    element
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            let skipped = parent
                .value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"));
            (!skipped).then(|| normalize_whitespace(text))
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn transport_error(err: reqwest::Error) -> ContentError {
    if err.is_timeout() {
        ContentError::Timeout
    } else {
        ContentError::Network(err.to_string())
    }
}

fn content_status(status: StatusCode) -> std::result::Result<(), ContentError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(ContentError::NotFound),
        StatusCode::TOO_MANY_REQUESTS => Err(ContentError::RateLimited),
        s => Err(ContentError::Network(format!("HTTP {s}"))),
    }
}

fn listing_status(url: &str, status: StatusCode) -> std::result::Result<(), ListingError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(ListingError::not_found(url)),
        s => Err(ListingError::network(url, format!("HTTP {s}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;

    const PARENT_URL: &str = "https://novlove.com/novel/the-long-road";

    fn source() -> HtmlSource {
        let config = Config::default();
        HtmlSource::new(Client::new(), &config.sources[0]).unwrap()
    }

    fn listing_page(rows: &str) -> String {
        format!(
            r#"<html><body><div id="tab-chapters"><ul class="list-chapter">{rows}</ul></div></body></html>"#
        )
    }

    fn parse_listing(html: &str) -> std::result::Result<Vec<ChapterListing>, ListingError> {
        let base = Url::parse(PARENT_URL).unwrap();
        source().parse_page(html, &base).map(|page| page.chapters)
    }

    #[test]
    fn test_parse_listing_resolves_links_and_numbers() {
        let html = listing_page(
            r#"
            <li><a href="/b/the-long-road/chapter-1">Chapter 1: Departure</a></li>
            <li><a href="/b/the-long-road/chapter-2">  Chapter 2:
                The   River </a></li>
            <li><a href="https://novlove.com/b/the-long-road/chapter-10">Chapter 10</a></li>
            "#,
        );
        let listings = parse_listing(&html).unwrap();

        assert_eq!(listings.len(), 3);
        assert_eq!(listings[0].sequence_number, 1);
        assert_eq!(listings[0].url, "https://novlove.com/b/the-long-road/chapter-1");
        assert_eq!(listings[1].title, "Chapter 2: The River");
        assert_eq!(listings[2].sequence_number, 10);
    }

    #[test]
    fn test_parse_listing_falls_back_to_position() {
        let html = listing_page(
            r#"
            <li><a href="/b/x/prologue">Prologue</a></li>
            <li><span>no link here</span></li>
            <li><a href="/b/x/interlude" title="Interlude"></a></li>
            <li><a href="/b/x/chapter-3">Chapter 3</a></li>
            "#,
        );
        let listings = parse_listing(&html).unwrap();

        assert_eq!(listings.len(), 3);
        assert_eq!(listings[0].sequence_number, 1);
        assert_eq!(listings[1].title, "Interlude");
        assert_eq!(listings[1].sequence_number, 2);
        assert_eq!(listings[2].sequence_number, 3);
    }

    #[test]
    fn test_parse_listing_without_rows_is_parse_error() {
        let result = parse_listing("<html><body>Maintenance</body></html>");
        assert!(matches!(result, Err(ListingError::Parse { .. })));
    }

    #[test]
    fn test_parse_page_reads_details() {
        let html = r#"
            <html><head>
              <meta property="og:novel:status" content="Completed">
            </head><body>
            <div class="col-novel-main">
              <h3 class="title"> The Long   Road </h3>
              <meta itemprop="image" content="/media/long-road.jpg">
              <span itemprop="author"><meta itemprop="name" content="Ink Stone"></span>
              <input id="rateVal" value="4.6">
              <ul class="info info-meta">
                <li><h3>Genre:</h3>
                  <a href="/nov-love-genres/fantasy">Fantasy</a>,
                  <a href="/nov-love-genres/action">Action</a>,
                  <a href="/nov-love-genres/fantasy">fantasy</a>
                </li>
                <li><h3>Source:</h3><a href="/source/x">Elsewhere</a></li>
              </ul>
              <div class="desc-text"><p>A long road.</p><p>It  keeps going.</p></div>
            </div>
            <div id="tab-chapters"><ul class="list-chapter">
              <li><a href="/b/the-long-road/chapter-1">Chapter 1</a></li>
            </ul></div>
            </body></html>"#;
        let base = Url::parse(PARENT_URL).unwrap();
        let page = source().parse_page(html, &base).unwrap();

        assert_eq!(page.chapters.len(), 1);
        assert_eq!(page.title.as_deref(), Some("The Long Road"));
        let details = page.details.unwrap();
        assert_eq!(details.author.as_deref(), Some("Ink Stone"));
        assert_eq!(details.description.as_deref(), Some("A long road.\nIt keeps going."));
        assert_eq!(
            details.cover_image_url.as_deref(),
            Some("https://novlove.com/media/long-road.jpg")
        );
        assert_eq!(details.is_completed, Some(true));
        assert_eq!(details.rating, Some(4.6));
        assert_eq!(details.genres, vec!["Action", "Fantasy"]);
    }

    #[test]
    fn test_missing_details_do_not_fail_the_listing() {
        let html = listing_page(r#"<li><a href="/b/x/chapter-1">Chapter 1</a></li>"#);
        let base = Url::parse(PARENT_URL).unwrap();
        let page = source().parse_page(&html, &base).unwrap();

        assert_eq!(page.chapters.len(), 1);
        assert!(page.title.is_none());
        assert!(page.details.is_some_and(|d| d.is_empty()));
    }

    #[test]
    fn test_source_without_detail_rules_reports_none() {
        let mut config = Config::default().sources[0].clone();
        config.details = None;
        let source = HtmlSource::new(Client::new(), &config).unwrap();
        let html = listing_page(r#"<li><a href="/b/x/chapter-1">Chapter 1</a></li>"#);
        let base = Url::parse(PARENT_URL).unwrap();

        let page = source.parse_page(&html, &base).unwrap();
        assert!(page.details.is_none());
    }

    #[test]
    fn test_status_and_rating_parsing() {
        assert!(is_completed_status(" Completed "));
        assert!(is_completed_status("finished"));
        assert!(!is_completed_status("Ongoing"));
        assert!(!is_completed_status("Incomplete"));
        assert_eq!(parse_rating("3.5"), Some(3.5));
        assert_eq!(parse_rating("n/a"), None);
        assert_eq!(parse_rating("NaN"), None);
    }

    #[test]
    fn test_parse_sitemap_filters_parent_urls() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://novlove.com/novel/the-long-road</loc><lastmod>2026-01-02</lastmod></url>
              <url><loc>https://novlove.com/nov-love-genres/fantasy</loc></url>
              <url><loc> https://novlove.com/novel/river-song/ </loc></url>
              <url><loc>https://novlove.com/novel/the-long-road/chapter-1</loc></url>
              <url><loc>https://novlove.com/novel/the-long-road</loc></url>
            </urlset>"#;
        let pattern = Regex::new(r"^https://novlove\.com/novel/[^/?#]+/?$").unwrap();

        assert_eq!(
            parse_sitemap(xml, &pattern),
            vec![
                "https://novlove.com/novel/the-long-road",
                "https://novlove.com/novel/river-song/",
            ]
        );
        assert!(parse_sitemap("not a sitemap", &pattern).is_empty());
    }

    #[tokio::test]
    async fn test_discovery_without_sitemap_is_unsupported() {
        let mut config = Config::default().sources[0].clone();
        config.sitemap_url = None;
        let source = HtmlSource::new(Client::new(), &config).unwrap();
        assert!(matches!(
            source.discover_parents().await,
            Err(ListingError::Unsupported { source_id }) if source_id == "novlove"
        ));
    }

    #[test]
    fn test_parse_content_skips_scripts() {
        let html = r#"
            <div id="chr-content">
                <p>The road was long.</p>
                <script>window.ads = 1;</script>
                <p>  It kept   going. </p>
            </div>"#;
        let content = source().parse_content(html).unwrap();
        assert_eq!(content, "The road was long.\nIt kept going.");
    }

    #[test]
    fn test_parse_content_missing_body() {
        assert!(matches!(
            source().parse_content("<div id='other'>x</div>"),
            Err(ContentError::Parse(_))
        ));
        assert!(matches!(
            source().parse_content("<div id='chr-content'>  </div>"),
            Err(ContentError::Parse(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(content_status(StatusCode::OK), Ok(()));
        assert_eq!(content_status(StatusCode::NOT_FOUND), Err(ContentError::NotFound));
        assert_eq!(content_status(StatusCode::GONE), Err(ContentError::NotFound));
        assert_eq!(
            content_status(StatusCode::TOO_MANY_REQUESTS),
            Err(ContentError::RateLimited)
        );
        assert!(matches!(
            content_status(StatusCode::BAD_GATEWAY),
            Err(ContentError::Network(_))
        ));

        assert!(matches!(
            listing_status(PARENT_URL, StatusCode::NOT_FOUND),
            Err(ListingError::NotFound { .. })
        ));
        assert!(matches!(
            listing_status(PARENT_URL, StatusCode::SERVICE_UNAVAILABLE),
            Err(ListingError::Network { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let mut config = Config::default().sources[0].clone();
        config.sequence_pattern = Some("(unclosed".to_string());
        assert!(matches!(
            HtmlSource::new(Client::new(), &config),
            Err(AppError::Config(_))
        ));

        let mut config = Config::default().sources[0].clone();
        config.parent_url_pattern = None;
        assert!(matches!(
            HtmlSource::new(Client::new(), &config),
            Err(AppError::Config(_))
        ));
    }
}
