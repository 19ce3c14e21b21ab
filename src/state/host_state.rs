use std::time::{Duration, Instant};

/// Tracks the politeness state of one host during a run
///
/// This structure holds what the fetcher needs to space out requests to a
/// host: when the last fetch finished and whether the host asked us to back off.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Number of fetches made to this host in the current run
    pub request_count: u64,

    /// When the last fetch to this host finished
    pub last_fetch: Option<Instant>,

    /// Earliest instant the next fetch may start (set by backoff)
    pub not_before: Option<Instant>,

    /// Number of 429/5xx responses in a row
    pub consecutive_backoffs: u32,
}

impl HostState {
    /// Creates a new HostState with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the time until the next fetch can start
    ///
    /// Returns None if a fetch can start now.
    pub fn time_until_next_request(&self, delay: Duration, now: Instant) -> Option<Duration> {
        let spaced = self.last_fetch.map(|last| last + delay);
        let ready_at = match (spaced, self.not_before) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }?;

        (ready_at > now).then(|| ready_at - now)
    }

    /// Records that a fetch to this host finished
    pub fn record_fetch(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_fetch = Some(now);
    }

    /// Pushes the next allowed fetch back after a 429/5xx
    ///
    /// Uses `retry_after` when the server sent one, otherwise doubles `base`
    /// for every consecutive backoff. The result is capped at `max`.
    pub fn apply_backoff(
        &mut self,
        now: Instant,
        retry_after: Option<Duration>,
        base: Duration,
        max: Duration,
    ) -> Duration {
        let exponent = self.consecutive_backoffs.min(16);
        let computed = retry_after.unwrap_or_else(|| base.saturating_mul(1u32 << exponent));
        let wait = computed.min(max);

        self.consecutive_backoffs += 1;
        self.not_before = Some(now + wait);
        wait
    }

    /// Clears backoff after a successful response
    pub fn clear_backoff(&mut self) {
        self.consecutive_backoffs = 0;
        self.not_before = None;
    }
}
