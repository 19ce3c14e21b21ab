//! URL handling module for Dredge
//!
//! This module provides URL normalization (the frontier's dedup key), host
//! extraction, domain pattern matching, and link resolution for extractors.

mod domain;
mod matcher;
mod normalize;

use ::url::Url;

// Re-export main functions
pub use domain::extract_host;
pub use matcher::{matches_wildcard, pattern_specificity};
pub use normalize::normalize_url;

/// Resolves an href found on a page to an absolute HTTP(S) URL
///
/// Returns None if the link should be skipped:
/// - empty hrefs and fragment-only anchors
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - hrefs that fail to resolve against the base URL
/// - anything that is not HTTP(S) after resolution
///
/// # Examples
///
/// ```
/// use url::Url;
/// use dredge::url::resolve_link;
///
/// let base = Url::parse("https://example.com/catalogue/page-1.html").unwrap();
/// assert_eq!(
///     resolve_link("page-2.html", &base).map(|u| u.to_string()),
///     Some("https://example.com/catalogue/page-2.html".to_string())
/// );
/// assert_eq!(resolve_link("mailto:sales@example.com", &base), None);
/// ```
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then_some(absolute)
}
