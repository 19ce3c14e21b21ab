use crate::UrlError;
use url::Url;

/// Tracking query parameters dropped during normalization
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid"];

/// Normalizes a URL into the key the frontier deduplicates on
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https` (the scheme is kept, not rewritten)
/// 3. Lowercase the host; default ports are dropped by the parser
/// 4. Normalize path:
///    - Remove dot segments (. and ..) and repeated slashes
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 5. Remove fragment (everything after #)
/// 6. Remove tracking query parameters (`utm_*`, `fbclid`, `gclid`, ...)
/// 7. Sort remaining query parameters by key, then value
/// 8. Remove empty query string (trailing ?)
///
/// Query segments are reordered as written, never decoded and re-encoded, so
/// `item.asp?12345` stays a request for `item.asp?12345`. Normalizing an
/// already normalized URL returns it unchanged.
///
/// # Examples
///
/// ```
/// use dredge::url::normalize_url;
///
/// let url = normalize_url("https://Shop.EXAMPLE.com/cat/?page=2&sort=price#top").unwrap();
/// assert_eq!(url.as_str(), "https://shop.example.com/cat?page=2&sort=price");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if let Some(query) = url.query() {
        let query = filter_and_sort_query(query);
        url.set_query((!query.is_empty()).then_some(query.as_str()));
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Drops tracking parameters and sorts the raw `&`-separated segments by
/// key, then value
fn filter_and_sort_query(query: &str) -> String {
    let mut segments: Vec<(&str, Option<&str>)> = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (segment, None),
        })
        .filter(|(key, _)| !is_tracking_param(key))
        .collect();

    segments.sort_unstable();

    segments
        .into_iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{}={}", key, value),
            None => key.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
