//! The frontier's single coordinating owner
//!
//! All entry state lives behind one mutex. Claiming (Pending → InFlight) and
//! every other transition happen while holding it, so two workers can never
//! observe the same entry as Pending. Waiters are woken through a `Notify`
//! whenever an entry changes state.

use crate::frontier::{FrontierCounts, FrontierEntry, FrontierError};
use crate::state::EntryState;
use crate::url::normalize_url;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct FrontierInner {
    entries: HashMap<String, FrontierEntry>,
    /// Pending keys in fetch order
    queue: VecDeque<String>,
    counts: FrontierCounts,
}

enum Claim {
    Url(String),
    Wait,
    Exhausted,
}

/// The set of known URLs and their crawl state
#[derive(Debug, Default)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    changed: Notify,
}

impl Frontier {
    /// Creates an empty frontier
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the dedup key for a URL (its normalized form)
    pub fn key_for(url: &str) -> Result<String, FrontierError> {
        Ok(normalize_url(url)?.to_string())
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a URL as Pending if it is not already known
    ///
    /// Returns `Ok(true)` if a new entry was created and `Ok(false)` if the
    /// normalized URL was already in the frontier, whatever its state.
    pub fn enqueue(&self, url: &str) -> Result<bool, FrontierError> {
        let key = Self::key_for(url)?;

        {
            let mut inner = self.lock();
            if inner.entries.contains_key(&key) {
                return Ok(false);
            }
            inner
                .entries
                .insert(key.clone(), FrontierEntry::pending(key.clone()));
            inner.queue.push_back(key);
            inner.counts.add(EntryState::Pending);
        }

        self.changed.notify_waiters();
        Ok(true)
    }

    /// Claims the oldest Pending entry, moving it to InFlight
    ///
    /// Returns None when nothing is Pending right now.
    pub fn next(&self) -> Option<String> {
        match self.claim() {
            Claim::Url(url) => Some(url),
            Claim::Wait | Claim::Exhausted => None,
        }
    }

    /// Claims the next Pending entry, waiting while other entries are in flight
    ///
    /// In-flight pages may still discover links or be requeued, so an empty
    /// queue only ends the crawl once nothing is in flight either.
    pub async fn next_ready(&self) -> Option<String> {
        loop {
            let notified = self.changed.notified();
            match self.claim() {
                Claim::Url(url) => return Some(url),
                Claim::Exhausted => return None,
                Claim::Wait => {}
            }
            notified.await;
        }
    }

    fn claim(&self) -> Claim {
        let mut guard = self.lock();
        let inner = &mut *guard;

        while let Some(key) = inner.queue.pop_front() {
            let Some(entry) = inner.entries.get_mut(&key) else {
                continue;
            };
            if entry.state != EntryState::Pending {
                continue;
            }

            entry.state = EntryState::InFlight;
            entry.attempts += 1;
            inner.counts.remove(EntryState::Pending);
            inner.counts.add(EntryState::InFlight);
            return Claim::Url(key);
        }

        if inner.counts.in_flight == 0 {
            Claim::Exhausted
        } else {
            Claim::Wait
        }
    }

    /// Marks an in-flight URL as done
    pub fn mark_done(&self, url: &str) -> Result<(), FrontierError> {
        self.transition(url, EntryState::InFlight, EntryState::Done, None)
    }

    /// Marks an in-flight URL as failed, keeping the reason for inspection
    pub fn mark_failed(&self, url: &str, reason: &str) -> Result<(), FrontierError> {
        self.transition(url, EntryState::InFlight, EntryState::Failed, Some(reason))
    }

    /// Puts an in-flight URL back at the end of the queue
    ///
    /// The caller decides whether a retry is still allowed.
    pub fn requeue(&self, url: &str, reason: &str) -> Result<(), FrontierError> {
        self.transition(url, EntryState::InFlight, EntryState::Pending, Some(reason))
    }

    /// Moves a failed URL back to Pending for another attempt
    pub fn retry_failed(&self, url: &str) -> Result<(), FrontierError> {
        self.transition(url, EntryState::Failed, EntryState::Pending, None)
    }

    fn transition(
        &self,
        url: &str,
        expected: EntryState,
        to: EntryState,
        reason: Option<&str>,
    ) -> Result<(), FrontierError> {
        let key = Self::key_for(url)?;

        {
            let mut guard = self.lock();
            let inner = &mut *guard;

            let entry = inner
                .entries
                .get_mut(&key)
                .ok_or_else(|| FrontierError::UnknownUrl(key.clone()))?;

            let from = entry.state;
            if from != expected || !from.can_transition_to(to) {
                return Err(FrontierError::InvalidTransition { url: key, from, to });
            }

            entry.state = to;
            if let Some(reason) = reason {
                entry.last_error = Some(reason.to_string());
            }

            inner.counts.remove(from);
            inner.counts.add(to);
            if to == EntryState::Pending {
                inner.queue.push_back(key);
            }
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Returns a copy of the entry for a URL
    pub fn entry(&self, url: &str) -> Option<FrontierEntry> {
        let key = Self::key_for(url).ok()?;
        self.lock().entries.get(&key).cloned()
    }

    /// Returns the state of a URL, if known
    pub fn state_of(&self, url: &str) -> Option<EntryState> {
        self.entry(url).map(|entry| entry.state)
    }

    /// Returns how many times a URL has been claimed
    pub fn attempts(&self, url: &str) -> Option<u32> {
        self.entry(url).map(|entry| entry.attempts)
    }

    /// Returns entry counts by state
    pub fn counts(&self) -> FrontierCounts {
        self.lock().counts
    }

    /// True when nothing is Pending and nothing is InFlight
    pub fn is_exhausted(&self) -> bool {
        let counts = self.counts();
        counts.pending == 0 && counts.in_flight == 0
    }

    /// Number of known URLs
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns whether the frontier knows no URLs at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all entries in a given state, oldest discovery first
    pub fn entries_in(&self, state: EntryState) -> Vec<FrontierEntry> {
        let mut entries: Vec<FrontierEntry> = self
            .lock()
            .entries
            .values()
            .filter(|entry| entry.state == state)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at).then(a.url.cmp(&b.url)));
        entries
    }

    /// Copies every entry for persistence
    ///
    /// Pending entries come first, in fetch order, so that `restore` rebuilds
    /// the same queue.
    pub fn snapshot(&self) -> Vec<FrontierEntry> {
        let inner = self.lock();

        let mut snapshot: Vec<FrontierEntry> = inner
            .queue
            .iter()
            .filter_map(|key| inner.entries.get(key))
            .filter(|entry| entry.state == EntryState::Pending)
            .cloned()
            .collect();

        let mut rest: Vec<FrontierEntry> = inner
            .entries
            .values()
            .filter(|entry| entry.state != EntryState::Pending)
            .cloned()
            .collect();
        rest.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at).then(a.url.cmp(&b.url)));

        snapshot.extend(rest);
        snapshot
    }

    /// Loads entries from a previous run
    ///
    /// Entries that were InFlight when that run stopped are restored as
    /// Pending. URLs already known are left untouched. Returns the number of
    /// entries added.
    pub fn restore(&self, entries: impl IntoIterator<Item = FrontierEntry>) -> usize {
        let mut restored = 0;

        {
            let mut guard = self.lock();
            let inner = &mut *guard;

            for mut entry in entries {
                if inner.entries.contains_key(&entry.url) {
                    continue;
                }
                if entry.state == EntryState::InFlight {
                    entry.state = EntryState::Pending;
                }
                if entry.state == EntryState::Pending {
                    inner.queue.push_back(entry.url.clone());
                }
                inner.counts.add(entry.state);
                inner.entries.insert(entry.url.clone(), entry);
                restored += 1;
            }
        }

        if restored > 0 {
            self.changed.notify_waiters();
        }
        restored
    }
}
