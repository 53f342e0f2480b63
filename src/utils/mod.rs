//! Utility functions and helpers.

pub mod http;

use regex::Regex;
use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract a chapter number from a title with the first capture group of `pattern`.
///
/// Returns `None` when nothing matches or the number does not fit in `u32`.
pub fn parse_sequence(pattern: &Regex, title: &str) -> Option<u32> {
    pattern
        .captures(title)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
