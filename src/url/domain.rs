use url::Url;

/// Extracts the lowercase host of a URL
///
/// Politeness delays and extractor dispatch are both keyed by host, so two
/// URLs on different ports of the same host share one key.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use dredge::url::extract_host;
///
/// let url = Url::parse("https://Cars.Example.com/listing/7").unwrap();
/// assert_eq!(extract_host(&url), Some("cars.example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
