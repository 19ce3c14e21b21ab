//! Extracted records
//!
//! A record is what an extractor pulls out of a page: a set of named fields
//! plus the natural key that identifies the item across runs (a URL, SKU, VIN or
//! listing id). The collection names the site the record came from, so keys
//! from different sites never collide in the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One extracted item, keyed by its natural key within a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Site/collection the record belongs to
    pub collection: String,

    /// Natural key, stable across runs
    pub key: String,

    /// Field name to scalar or nested value
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record with no fields
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a field, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Renders a field as plain text (strings unquoted, nested values as JSON)
    pub fn field_text(&self, name: &str) -> Option<String> {
        self.get(name).map(value_text)
    }
}

/// Merges a record's fields into a stored document
///
/// Each field present in `patch` replaces the stored value whole, nested
/// objects included. A null field removes the stored one. Fields the patch
/// omits are kept.
pub fn merge_fields(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (name, value) in patch {
        if value.is_null() {
            target.remove(name);
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

/// Renders a JSON value as plain text
///
/// Strings are returned without quotes, null becomes an empty string, and
/// arrays/objects are rendered as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
