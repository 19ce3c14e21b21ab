/// Checks if a host matches a site's domain pattern
///
/// Patterns are either exact (`"example.com"`) or wildcard (`"*.example.com"`).
/// A wildcard pattern matches the bare domain and any subdomain of it.
/// Comparison is ASCII case-insensitive.
///
/// # Examples
///
/// ```
/// use dredge::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "EXAMPLE.com"));
/// assert!(!matches_wildcard("example.com", "shop.example.com"));
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "shop.eu.example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || (host.len() > base.len()
                    && host.ends_with(base)
                    && host.as_bytes()[host.len() - base.len() - 1] == b'.')
        }
        None => host == pattern,
    }
}

/// Ranks how specific a pattern is; higher wins when several patterns match
///
/// Exact patterns always outrank wildcards. Among wildcards, the one with
/// more labels is the more specific.
pub fn pattern_specificity(pattern: &str) -> usize {
    match pattern.strip_prefix("*.") {
        Some(base) => base.split('.').count(),
        None => usize::MAX,
    }
}
