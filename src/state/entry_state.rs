/// Frontier entry state definitions
///
/// Every known URL is in exactly one of these states. Entries move forward
/// only (Pending → InFlight → Done/Failed); the two ways back to Pending are
/// explicit retries chosen by the driver.
use std::fmt;

/// Represents the crawl state of a single frontier entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Discovered and waiting to be fetched
    Pending,

    /// Claimed by a worker and currently being processed
    InFlight,

    /// Fetched, extracted and persisted
    Done,

    /// Gave up on this URL; kept for inspection and later re-runs
    Failed,
}

impl EntryState {
    /// Returns true if no further processing will happen without a retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the entry still needs work
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    /// Checks whether moving from this state to `next` is allowed
    ///
    /// | From     | To                        |
    /// |----------|---------------------------|
    /// | Pending  | InFlight                  |
    /// | InFlight | Done, Failed, Pending (retry) |
    /// | Failed   | Pending (retry)           |
    /// | Done     | -                         |
    pub fn can_transition_to(&self, next: EntryState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Done)
                | (Self::InFlight, Self::Failed)
                | (Self::InFlight, Self::Pending)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all entry states
    pub fn all_states() -> [Self; 4] {
        [Self::Pending, Self::InFlight, Self::Done, Self::Failed]
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
