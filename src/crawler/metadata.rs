//! Run counters
//!
//! Counters are process-scoped and start from zero every run. Workers bump
//! them through `RunCounters`; `RunMetadata` is a plain snapshot for reports
//! and the run history.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a run's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub start_time: DateTime<Utc>,
    pub pages_fetched: u64,
    pub records_written: u64,
    pub records_unchanged: u64,
    pub records_skipped: u64,
    pub retries: u64,
    pub failures: u64,
}

impl RunMetadata {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            pages_fetched: 0,
            records_written: 0,
            records_unchanged: 0,
            records_skipped: 0,
            retries: 0,
            failures: 0,
        }
    }
}

/// Live counters shared by every worker
#[derive(Debug)]
pub struct RunCounters {
    start_time: DateTime<Utc>,
    pages_fetched: AtomicU64,
    records_written: AtomicU64,
    records_unchanged: AtomicU64,
    records_skipped: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl Default for RunCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCounters {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            pages_fetched: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            records_unchanged: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Counts a fetch and returns the new total
    pub fn page_fetched(&self) -> u64 {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.records_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_skipped(&self, count: usize) {
        self.records_skipped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunMetadata {
        RunMetadata {
            start_time: self.start_time,
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_unchanged: self.records_unchanged.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
