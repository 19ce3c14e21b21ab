//! Storage traits and error types
//!
//! Three seams, all implemented by `SqliteStore`:
//! - `Sink`: idempotent upsert of records keyed by natural key
//! - `FrontierStore`: frontier checkpoints for resumable runs
//! - `RunLog`: the run history table

use crate::crawler::RunMetadata;
use crate::frontier::FrontierEntry;
use crate::record::Record;
use crate::storage::{RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),
}

/// Persistence failures seen by the driver; always retryable
pub type SinkError = StorageError;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was inserted or at least one field changed
    Written,
    /// The stored document already contained exactly these fields
    Unchanged,
}

/// A record as stored, with its bookkeeping timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: Record,
    /// RFC 3339 time of the first insert
    pub first_seen: String,
    /// RFC 3339 time of the last upsert that changed a field
    pub updated_at: String,
}

/// Key-based record persistence
///
/// `upsert` replaces every field the record carries, nested values whole.
/// Fields the record omits are kept and a field set to null is removed. Upserting the same record twice leaves the store untouched the
/// second time.
pub trait Sink: Send + Sync {
    fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome>;

    fn exists(&self, collection: &str, key: &str) -> StorageResult<bool>;

    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredRecord>>;

    /// All records of a collection, in first-insert order
    fn records(&self, collection: &str) -> StorageResult<Vec<StoredRecord>>;

    /// Number of records in one collection, or in all of them
    fn count(&self, collection: Option<&str>) -> StorageResult<u64>;

    /// Names of every collection with at least one record
    fn collections(&self) -> StorageResult<Vec<String>>;

    /// Makes every write so far durable; called at the end of each run
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Frontier checkpoints
pub trait FrontierStore: Send + Sync {
    /// Replaces the stored frontier with this snapshot
    fn save_frontier(&self, entries: &[FrontierEntry]) -> StorageResult<()>;

    /// Loads the stored frontier in snapshot order
    fn load_frontier(&self) -> StorageResult<Vec<FrontierEntry>>;

    fn clear_frontier(&self) -> StorageResult<()>;
}

/// Run history
pub trait RunLog: Send + Sync {
    /// Records the start of a run and returns its id
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Records how a run ended and its counters
    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        metadata: &RunMetadata,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Most recent runs first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;
}
