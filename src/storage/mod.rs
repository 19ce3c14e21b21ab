//! Storage module for persisting crawl data
//!
//! This module handles everything that outlives a run:
//! - extracted records, upserted by natural key
//! - frontier checkpoints for resuming interrupted runs
//! - the run history

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemorySink;
pub use sqlite::SqliteStore;
pub use traits::{
    FrontierStore, RunLog, Sink, SinkError, StorageError, StorageResult, StoredRecord,
    UpsertOutcome,
};

use std::path::Path;

/// Opens (or creates) the SQLite store at `path`
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub pages_fetched: u64,
    pub records_written: u64,
    pub records_unchanged: u64,
    pub records_skipped: u64,
    pub retries: u64,
    pub failures: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}
