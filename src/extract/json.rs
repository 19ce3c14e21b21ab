//! JSON pointer extraction for listing APIs

use crate::config::{JsonConfig, JsonFieldRule};
use crate::extract::{Extraction, ExtractionError, Extractor, Page};
use crate::record::{value_text, Record};
use crate::url::resolve_link;
use crate::ConfigError;
use serde_json::{Map, Value};

/// Extracts records from JSON responses with RFC 6901 pointers
#[derive(Debug)]
pub struct JsonExtractor {
    collection: String,
    items: Option<String>,
    key: String,
    fields: Vec<(String, JsonFieldRule)>,
    next: Vec<String>,
}

impl JsonExtractor {
    pub fn new(collection: &str, config: &JsonConfig) -> Result<Self, ConfigError> {
        if !config.fields.contains_key(&config.key) {
            return Err(ConfigError::Validation(format!(
                "site '{}': key field '{}' is not one of the extracted fields",
                collection, config.key
            )));
        }

        let pointers = config
            .items
            .iter()
            .chain(config.fields.values().map(|rule| &rule.pointer))
            .chain(config.next.iter());
        for pointer in pointers {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "site '{}': JSON pointer '{}' must be empty or start with '/'",
                    collection, pointer
                )));
            }
        }

        Ok(Self {
            collection: collection.to_string(),
            items: config.items.clone(),
            key: config.key.clone(),
            fields: config
                .fields
                .iter()
                .map(|(name, rule)| (name.clone(), rule.clone()))
                .collect(),
            next: config.next.clone(),
        })
    }

    fn read_item(&self, value: &Value, item: usize) -> Result<Record, ExtractionError> {
        let mut fields = Map::new();

        for (name, rule) in &self.fields {
            match value.pointer(&rule.pointer).filter(|v| !v.is_null()) {
                Some(found) => {
                    fields.insert(name.clone(), found.clone());
                }
                None if rule.required || *name == self.key => {
                    return Err(ExtractionError::MissingField {
                        field: name.clone(),
                        item,
                    });
                }
                None => {}
            }
        }

        let key = fields.get(&self.key).map(value_text).unwrap_or_default();
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

impl Extractor for JsonExtractor {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn extract(&self, page: &Page<'_>) -> Extraction {
        let mut extraction = Extraction::default();

        let document: Value = match serde_json::from_str(page.body) {
            Ok(document) => document,
            Err(e) => {
                extraction
                    .skipped
                    .push(ExtractionError::MalformedPage(e.to_string()));
                return extraction;
            }
        };

        let items: Vec<&Value> = match &self.items {
            None => vec![&document],
            Some(pointer) => match document.pointer(pointer) {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(Value::Null) => Vec::new(),
                Some(single) => vec![single],
                None => {
                    extraction.skipped.push(ExtractionError::MalformedPage(format!(
                        "no items at '{}'",
                        pointer
                    )));
                    Vec::new()
                }
            },
        };

        for (index, item) in items.into_iter().enumerate() {
            match self.read_item(item, index) {
                Ok(record) => extraction.records.push(record),
                Err(e) => extraction.skipped.push(e),
            }
        }

        for pointer in &self.next {
            let links: Vec<&str> = match document.pointer(pointer) {
                Some(Value::String(link)) => vec![link.as_str()],
                Some(Value::Array(links)) => links.iter().filter_map(Value::as_str).collect(),
                // null or missing: last page
                _ => Vec::new(),
            };
            for link in links {
                if let Some(url) = resolve_link(link, page.url) {
                    extraction.push_link(url);
                }
            }
        }

        extraction.dedup_records();
        extraction
    }
}
