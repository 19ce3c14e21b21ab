//! Extractors: turning fetched pages into records and follow-up links
//!
//! An extractor is a pure function of a page body. It never fetches, never
//! persists and never touches the frontier; the driver does all of that with
//! what the extractor returns.
//!
//! # Components
//!
//! - `SelectorExtractor`: CSS selectors over HTML (item containers, fields, follow links)
//! - `JsonExtractor`: JSON pointers over JSON listing APIs
//! - `LinksExtractor`: one record per page, follows every link
//! - `ExtractorRegistry`: maps domain patterns to site extractors

mod json;
mod links;
mod registry;
mod selector;

pub use json::JsonExtractor;
pub use links::LinksExtractor;
pub use registry::{build_headers, ExtractorRegistry, SiteEntry};
pub use selector::SelectorExtractor;

use crate::config::ExtractorConfig;
use crate::record::Record;
use crate::ConfigError;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// A fetched page handed to an extractor
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    /// URL the page was fetched from
    pub url: &'a Url,
    pub body: &'a str,
    pub http_status: u16,
}

/// Why an item (or a whole page) produced no record
///
/// These never fail a page: the item is skipped, counted, and its siblings
/// still extract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("item {item}: missing required field '{field}'")]
    MissingField { field: String, item: usize },

    #[error("item {item}: field '{field}' has unparsable value '{value}'")]
    InvalidValue {
        field: String,
        value: String,
        item: usize,
    },

    #[error("item {item}: missing natural key")]
    MissingKey { item: usize },

    #[error("malformed page: {0}")]
    MalformedPage(String),
}

/// Everything an extractor pulled out of one page
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<Record>,

    /// Links to enqueue, in page order, without duplicates
    pub next_urls: Vec<Url>,

    /// Items that were skipped
    pub skipped: Vec<ExtractionError>,
}

impl Extraction {
    /// Adds a follow-up link unless it was already collected
    pub fn push_link(&mut self, url: Url) {
        if !self.next_urls.contains(&url) {
            self.next_urls.push(url);
        }
    }

    /// Keeps only the first record for each key
    ///
    /// Listing pages sometimes repeat an item (featured + regular slot).
    pub(crate) fn dedup_records(&mut self) {
        let mut seen = HashSet::new();
        self.records.retain(|record| seen.insert(record.key.clone()));
    }
}

/// A per-site extraction strategy
pub trait Extractor: Send + Sync {
    /// Short name of the strategy, for logs and `--dry-run`
    fn kind(&self) -> &'static str;

    /// Extracts records and follow-up links from a page
    fn extract(&self, page: &Page<'_>) -> Extraction;
}

/// Builds the extractor a site's configuration asks for
///
/// Records produced by the extractor belong to the collection named `site`.
pub fn build_extractor(
    site: &str,
    config: &ExtractorConfig,
) -> Result<Arc<dyn Extractor>, ConfigError> {
    let extractor: Arc<dyn Extractor> = match config {
        ExtractorConfig::Selector(cfg) => Arc::new(SelectorExtractor::new(site, cfg)?),
        ExtractorConfig::Json(cfg) => Arc::new(JsonExtractor::new(site, cfg)?),
        ExtractorConfig::Links(cfg) => Arc::new(LinksExtractor::new(site, cfg)?),
    };
    Ok(extractor)
}

/// Compiles a CSS selector, reporting failures against the site
pub(crate) fn parse_selector(site: &str, selector: &str) -> Result<scraper::Selector, ConfigError> {
    scraper::Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        site: site.to_string(),
        message: format!("'{}': {}", selector, e),
    })
}
