//! Crawl frontier
//!
//! The frontier is the set of every URL a run knows about and the state each
//! one is in. It is the only place that decides what gets fetched next, and it
//! guarantees that:
//! - a normalized URL has exactly one entry (discovery is idempotent)
//! - claiming a Pending entry is atomic, so concurrent workers never receive
//!   the same URL
//! - entries only move forward, except through the explicit retry operations

mod queue;

pub use queue::Frontier;

use crate::state::EntryState;
use crate::UrlError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Cannot enqueue URL: {0}")]
    Url(#[from] UrlError),

    #[error("URL is not in the frontier: {0}")]
    UnknownUrl(String),

    #[error("Invalid transition for {url}: {from} -> {to}")]
    InvalidTransition {
        url: String,
        from: EntryState,
        to: EntryState,
    },
}

/// One known URL and its crawl state
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEntry {
    /// Normalized URL (the dedup key)
    pub url: String,

    /// When the URL was first discovered
    pub discovered_at: DateTime<Utc>,

    /// Current state
    pub state: EntryState,

    /// Number of times the URL has been claimed for fetching
    pub attempts: u32,

    /// Reason for the last failure, if any
    pub last_error: Option<String>,
}

impl FrontierEntry {
    /// Creates a fresh Pending entry
    pub fn pending(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            discovered_at: Utc::now(),
            state: EntryState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Number of retries already spent (attempts after the first)
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Entry counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
}

impl FrontierCounts {
    /// Total number of known URLs
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.done + self.failed
    }

    /// Counts entries from a list
    pub fn tally<'a>(entries: impl IntoIterator<Item = &'a FrontierEntry>) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            counts.add(entry.state);
        }
        counts
    }

    fn add(&mut self, state: EntryState) {
        *self.slot(state) += 1;
    }

    fn remove(&mut self, state: EntryState) {
        let slot = self.slot(state);
        *slot = slot.saturating_sub(1);
    }

    fn slot(&mut self, state: EntryState) -> &mut usize {
        match state {
            EntryState::Pending => &mut self.pending,
            EntryState::InFlight => &mut self.in_flight,
            EntryState::Done => &mut self.done,
            EntryState::Failed => &mut self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_from_attempts() {
        let mut entry = FrontierEntry::pending("https://example.com/");
        assert_eq!(entry.retries(), 0);
        entry.attempts = 1;
        assert_eq!(entry.retries(), 0);
        entry.attempts = 3;
        assert_eq!(entry.retries(), 2);
    }

    #[test]
    fn test_tally() {
        let mut done = FrontierEntry::pending("https://example.com/a");
        done.state = EntryState::Done;
        let entries = vec![
            FrontierEntry::pending("https://example.com/b"),
            FrontierEntry::pending("https://example.com/c"),
            done,
        ];

        let counts = FrontierCounts::tally(&entries);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.total(), 3);
    }
}
