//! Domain-pattern registry of site extractors

use crate::config::{Config, SiteConfig};
use crate::extract::{build_extractor, Extractor};
use crate::url::{extract_host, matches_wildcard, pattern_specificity};
use crate::ConfigError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Everything the driver needs to crawl one site
#[derive(Clone)]
pub struct SiteEntry {
    /// Site name, also the record collection
    pub name: String,

    /// Domain pattern the site answers for
    pub pattern: String,

    /// Extra request headers
    pub headers: HeaderMap,

    pub extractor: Arc<dyn Extractor>,
}

impl SiteEntry {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            headers: HeaderMap::new(),
            extractor,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl fmt::Debug for SiteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteEntry")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("headers", &self.headers)
            .field("extractor", &self.extractor.kind())
            .finish()
    }
}

/// Sites keyed by domain pattern
///
/// A URL is dispatched to the site whose pattern matches its host. When
/// several patterns match (`*.example.com` and `shop.example.com`), the most
/// specific one wins.
#[derive(Debug, Clone, Default)]
pub struct ExtractorRegistry {
    sites: Vec<SiteEntry>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from every configured site
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for site in &config.sites {
            let extractor = build_extractor(&site.name, &site.extractor)?;
            let entry = SiteEntry::new(&site.name, &site.domain, extractor)
                .with_headers(build_headers(site)?);
            registry.register(entry);
        }

        Ok(registry)
    }

    /// Adds a site; a later registration for the same pattern replaces it
    pub fn register(&mut self, entry: SiteEntry) {
        self.sites
            .retain(|existing| !existing.pattern.eq_ignore_ascii_case(&entry.pattern));
        self.sites.push(entry);
    }

    /// Finds the site responsible for a URL
    pub fn resolve(&self, url: &Url) -> Option<&SiteEntry> {
        let host = extract_host(url)?;
        self.sites
            .iter()
            .filter(|site| matches_wildcard(&site.pattern, &host))
            .max_by_key(|site| pattern_specificity(&site.pattern))
    }

    /// Returns whether some site would handle this URL
    pub fn covers(&self, url: &Url) -> bool {
        self.resolve(url).is_some()
    }

    /// Looks up a site by name
    pub fn site(&self, name: &str) -> Option<&SiteEntry> {
        self.sites.iter().find(|site| site.name == name)
    }

    pub fn sites(&self) -> impl Iterator<Item = &SiteEntry> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Converts a site's configured headers into a `HeaderMap`
pub fn build_headers(site: &SiteConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();

    for (name, value) in &site.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                site: site.name.clone(),
                message: format!("'{}': {}", name, e),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
            site: site.name.clone(),
            message: format!("'{}' value: {}", name, e),
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}
