//! Generic link-following extraction
//!
//! Produces one record per page (`title`, `url`, `status`) keyed by the page
//! URL, and follows:
//! - `<a href="...">` tags anywhere in the document
//! - `<link rel="canonical" href="...">`
//!
//! Links with a `download` attribute are skipped. `rel="nofollow"` links are
//! followed.

use crate::config::LinksConfig;
use crate::extract::{parse_selector, Extraction, Extractor, Page};
use crate::record::Record;
use crate::url::{normalize_url, resolve_link};
use crate::ConfigError;
use scraper::{Html, Selector};

#[derive(Debug)]
pub struct LinksExtractor {
    collection: String,
    title: Selector,
    anchors: Selector,
    canonical: Selector,
}

impl LinksExtractor {
    pub fn new(collection: &str, config: &LinksConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            collection: collection.to_string(),
            title: parse_selector(collection, config.title.as_deref().unwrap_or("title"))?,
            anchors: parse_selector(collection, "a[href]")?,
            canonical: parse_selector(collection, "link[rel='canonical'][href]")?,
        })
    }

    fn extract_title(&self, document: &Html) -> Option<String> {
        document
            .select(&self.title)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl Extractor for LinksExtractor {
    fn kind(&self) -> &'static str {
        "links"
    }

    fn extract(&self, page: &Page<'_>) -> Extraction {
        let document = Html::parse_document(page.body);
        let mut extraction = Extraction::default();

        let key = normalize_url(page.url.as_str())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| page.url.to_string());

        let mut record = Record::new(&self.collection, key.clone())
            .with_field("url", key)
            .with_field("status", page.http_status);
        if let Some(title) = self.extract_title(&document) {
            record.set("title", title);
        }
        extraction.records.push(record);

        for element in document.select(&self.anchors) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, page.url))
            {
                extraction.push_link(url);
            }
        }

        for element in document.select(&self.canonical) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, page.url))
            {
                extraction.push_link(url);
            }
        }

        extraction
    }
}
