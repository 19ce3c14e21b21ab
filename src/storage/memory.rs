//! In-memory sink for tests and dry runs

use crate::record::{merge_fields, Record};
use crate::storage::traits::{Sink, StorageResult, StoredRecord, UpsertOutcome};
use chrono::Utc;
use serde_json::Map;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryInner {
    /// Records in first-insert order
    records: Vec<StoredRecord>,
    /// (collection, key) -> position in `records`
    index: HashMap<(String, String), usize>,
}

/// A `Sink` that keeps everything in process memory
///
/// Same merge semantics as `SqliteStore`.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<MemoryInner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for MemorySink {
    fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome> {
        let mut inner = self.lock();
        let id = (record.collection.clone(), record.key.clone());
        let now = Utc::now().to_rfc3339();

        let existing = inner.index.get(&id).copied();
        if let Some(position) = existing {
            let stored = &mut inner.records[position];
            let mut merged = stored.record.fields.clone();
            merge_fields(&mut merged, &record.fields);

            if merged == stored.record.fields {
                return Ok(UpsertOutcome::Unchanged);
            }

            stored.record.fields = merged;
            stored.updated_at = now;
            return Ok(UpsertOutcome::Written);
        }

        let mut fields = Map::new();
        merge_fields(&mut fields, &record.fields);

        inner.records.push(StoredRecord {
            record: Record {
                collection: record.collection.clone(),
                key: record.key.clone(),
                fields,
            },
            first_seen: now.clone(),
            updated_at: now,
        });
        let position = inner.records.len() - 1;
        inner.index.insert(id, position);
        Ok(UpsertOutcome::Written)
    }

    fn exists(&self, collection: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .lock()
            .index
            .contains_key(&(collection.to_string(), key.to_string())))
    }

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredRecord>> {
        let inner = self.lock();
        Ok(inner
            .index
            .get(&(collection.to_string(), key.to_string()))
            .map(|&position| inner.records[position].clone()))
    }

    fn records(&self, collection: &str) -> StorageResult<Vec<StoredRecord>> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|stored| stored.record.collection == collection)
            .cloned()
            .collect())
    }

    fn count(&self, collection: Option<&str>) -> StorageResult<u64> {
        let inner = self.lock();
        let count = match collection {
            Some(collection) => inner
                .records
                .iter()
                .filter(|stored| stored.record.collection == collection)
                .count(),
            None => inner.records.len(),
        };
        Ok(count as u64)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self
            .lock()
            .records
            .iter()
            .map(|stored| stored.record.collection.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
