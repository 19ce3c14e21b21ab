//! CSS selector extraction for HTML listing and detail pages

use crate::config::{SelectorConfig, ValueKind};
use crate::extract::{parse_selector, Extraction, ExtractionError, Extractor, Page};
use crate::record::{value_text, Record};
use crate::url::{normalize_url, resolve_link};
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Number, Value};
use url::Url;

#[derive(Debug)]
struct FieldSpec {
    name: String,
    selector: Selector,
    attr: Option<String>,
    value: ValueKind,
    required: bool,
}

/// Extracts records with CSS selectors
///
/// With an item selector, every matching element is one record and field
/// selectors are evaluated inside it. Without one, the whole page is a single
/// record keyed by the page URL (unless a key field is named).
#[derive(Debug)]
pub struct SelectorExtractor {
    collection: String,
    item: Option<Selector>,
    key: Option<String>,
    fields: Vec<FieldSpec>,
    follow: Vec<Selector>,
}

impl SelectorExtractor {
    pub fn new(collection: &str, config: &SelectorConfig) -> Result<Self, ConfigError> {
        if config.item.is_some() && config.key.is_none() {
            return Err(ConfigError::Validation(format!(
                "site '{}': an item selector needs a key field",
                collection
            )));
        }

        if let Some(key) = &config.key {
            if !config.fields.contains_key(key) {
                return Err(ConfigError::Validation(format!(
                    "site '{}': key field '{}' is not one of the extracted fields",
                    collection, key
                )));
            }
        }

        let item = config
            .item
            .as_deref()
            .map(|item| parse_selector(collection, item))
            .transpose()?;

        let fields = config
            .fields
            .iter()
            .map(|(name, rule)| {
                Ok(FieldSpec {
                    name: name.clone(),
                    selector: parse_selector(collection, &rule.selector)?,
                    attr: rule.attr.clone(),
                    value: rule.value,
                    // The key is always required
                    required: rule.required || config.key.as_deref() == Some(name.as_str()),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let follow = config
            .follow
            .iter()
            .map(|selector| parse_selector(collection, selector))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            collection: collection.to_string(),
            item,
            key: config.key.clone(),
            fields,
            follow,
        })
    }

    fn read_item(
        &self,
        scope: ElementRef<'_>,
        item: usize,
        page: &Page<'_>,
    ) -> Result<Record, ExtractionError> {
        let mut fields = Map::new();

        for spec in &self.fields {
            let raw = scope
                .select(&spec.selector)
                .next()
                .and_then(|element| read_raw(element, spec.attr.as_deref(), page.url))
                .filter(|raw| !raw.is_empty());

            let Some(raw) = raw else {
                if spec.required {
                    return Err(ExtractionError::MissingField {
                        field: spec.name.clone(),
                        item,
                    });
                }
                continue;
            };

            match parse_value(&raw, spec.value) {
                Some(value) => {
                    fields.insert(spec.name.clone(), value);
                }
                None if spec.required => {
                    return Err(ExtractionError::InvalidValue {
                        field: spec.name.clone(),
                        value: raw,
                        item,
                    });
                }
                None => {
                    tracing::debug!(
                        "Dropping optional field '{}' with value '{}' on {}",
                        spec.name,
                        raw,
                        page.url
                    );
                }
            }
        }

        let key = match &self.key {
            Some(key) => fields.get(key).map(value_text).unwrap_or_default(),
            None => page_key(page.url),
        };
        if key.is_empty() {
            return Err(ExtractionError::MissingKey { item });
        }

        Ok(Record {
            collection: self.collection.clone(),
            key,
            fields,
        })
    }
}

impl Extractor for SelectorExtractor {
    fn kind(&self) -> &'static str {
        "selector"
    }

    fn extract(&self, page: &Page<'_>) -> Extraction {
        let document = Html::parse_document(page.body);
        let mut extraction = Extraction::default();

        match &self.item {
            Some(item_selector) => {
                for (index, element) in document.select(item_selector).enumerate() {
                    match self.read_item(element, index, page) {
                        Ok(record) => extraction.records.push(record),
                        Err(e) => extraction.skipped.push(e),
                    }
                }
            }
            None if self.fields.is_empty() => {}
            None => match self.read_item(document.root_element(), 0, page) {
                Ok(record) => extraction.records.push(record),
                Err(e) => extraction.skipped.push(e),
            },
        }

        for selector in &self.follow {
            for element in document.select(selector) {
                if let Some(url) = element
                    .value()
                    .attr("href")
                    .and_then(|href| resolve_link(href, page.url))
                {
                    extraction.push_link(url);
                }
            }
        }

        extraction.dedup_records();
        extraction
    }
}

/// Key for a page-level record: the normalized page URL
fn page_key(url: &Url) -> String {
    normalize_url(url.as_str())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Reads an element's text or attribute, whitespace collapsed
///
/// `href` and `src` attributes are resolved against the page URL.
fn read_raw(element: ElementRef<'_>, attr: Option<&str>, base: &Url) -> Option<String> {
    match attr {
        Some(name) => {
            let value = element.value().attr(name)?.trim();
            if matches!(name, "href" | "src") && !value.is_empty() {
                return Some(match base.join(value) {
                    Ok(url) => page_key(&url),
                    Err(_) => value.to_string(),
                });
            }
            Some(collapse_whitespace(value))
        }
        None => Some(collapse_whitespace(&element.text().collect::<String>())),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses extracted text into a JSON value of the requested kind
///
/// Numbers are read from the first numeric token, so currency symbols,
/// thousands separators and surrounding words are ignored:
/// `"£51.77"` → 51.77, `"$18,990"` → 18990, `"In stock (22 available)"` → 22.
pub(crate) fn parse_value(raw: &str, kind: ValueKind) -> Option<Value> {
    match kind {
        ValueKind::Text => Some(Value::String(raw.to_string())),
        ValueKind::Number => {
            let token = numeric_token(raw)?;
            if token.contains('.') {
                token
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            } else {
                token.parse::<i64>().ok().map(Value::from)
            }
        }
        ValueKind::Integer => {
            let token = numeric_token(raw)?;
            let whole = token.split('.').next()?;
            whole.parse::<i64>().ok().map(Value::from)
        }
    }
}

/// Finds the first run of digits (with an adjacent leading minus sign),
/// thousands separators removed
fn numeric_token(raw: &str) -> Option<String> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let negative = raw[..start].ends_with('-');

    let run: String = raw[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    let run = run.trim_end_matches('.');

    Some(if negative {
        format!("-{}", run)
    } else {
        run.to_string()
    })
}
