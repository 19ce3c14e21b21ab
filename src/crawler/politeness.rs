//! Per-host request spacing and backoff
//!
//! Every host gets its own async lock. A fetch holds its host's slot from
//! before the request until the response is classified, so requests to one
//! host are serialized and spaced by that host's delay while different hosts
//! proceed in parallel.

use crate::state::HostState;
use crate::url::{matches_wildcard, pattern_specificity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// What a finished request means for its host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// The host answered normally; clear any backoff
    Clear,
    /// 429/5xx; push the next request back, honouring Retry-After if given
    Backoff(Option<Duration>),
    /// No signal from the host (network error, robots denial)
    Keep,
}

#[derive(Debug)]
pub struct Politeness {
    default_delay: Duration,
    backoff: Duration,
    max_backoff: Duration,
    /// (domain pattern, delay) from site configuration
    overrides: Vec<(String, Duration)>,
    /// Crawl-delay floors from robots.txt, by host
    floors: Mutex<HashMap<String, Duration>>,
    hosts: Mutex<HashMap<String, Arc<AsyncMutex<HostState>>>>,
}

impl Politeness {
    pub fn new(default_delay: Duration, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            default_delay,
            backoff,
            max_backoff,
            overrides: Vec::new(),
            floors: Mutex::new(HashMap::new()),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `delay` instead of the default for hosts matching `pattern`
    pub fn with_override(mut self, pattern: impl Into<String>, delay: Duration) -> Self {
        self.overrides.push((pattern.into(), delay));
        self
    }

    /// Raises a host's delay to at least `delay` (robots.txt Crawl-delay)
    pub fn raise_delay(&self, host: &str, delay: Duration) {
        let mut floors = lock(&self.floors);
        let floor = floors.entry(host.to_string()).or_insert(Duration::ZERO);
        if delay > *floor {
            tracing::debug!("Raising delay for {} to {:?}", host, delay);
            *floor = delay;
        }
    }

    /// The spacing applied between two requests to `host`
    pub fn delay_for(&self, host: &str) -> Duration {
        let configured = self
            .overrides
            .iter()
            .filter(|(pattern, _)| matches_wildcard(pattern, host))
            .max_by_key(|(pattern, _)| pattern_specificity(pattern))
            .map(|(_, delay)| *delay)
            .unwrap_or(self.default_delay);

        let floor = lock(&self.floors).get(host).copied().unwrap_or_default();
        configured.max(floor)
    }

    /// Waits until `host` may be fetched and takes its slot
    pub async fn acquire(&self, host: &str) -> HostSlot {
        let state = {
            let mut hosts = lock(&self.hosts);
            Arc::clone(hosts.entry(host.to_string()).or_default())
        };

        let guard = state.lock_owned().await;
        let delay = self.delay_for(host);

        if let Some(wait) = guard.time_until_next_request(delay, Instant::now()) {
            tracing::trace!("Waiting {:?} before next request to {}", wait, host);
            tokio::time::sleep(wait).await;
        }

        HostSlot {
            host: host.to_string(),
            guard,
            backoff: self.backoff,
            max_backoff: self.max_backoff,
        }
    }

    /// Requests made to `host` so far
    pub async fn request_count(&self, host: &str) -> u64 {
        let state = lock(&self.hosts).get(host).cloned();
        match state {
            Some(state) => state.lock().await.request_count,
            None => 0,
        }
    }
}

/// Exclusive right to fetch from one host
#[derive(Debug)]
pub struct HostSlot {
    host: String,
    guard: OwnedMutexGuard<HostState>,
    backoff: Duration,
    max_backoff: Duration,
}

impl HostSlot {
    /// Records the finished request and releases the host
    pub fn release(mut self, throttle: Throttle) {
        let now = Instant::now();
        self.guard.record_fetch(now);

        match throttle {
            Throttle::Clear => self.guard.clear_backoff(),
            Throttle::Backoff(retry_after) => {
                let wait =
                    self.guard
                        .apply_backoff(now, retry_after, self.backoff, self.max_backoff);
                tracing::info!("Backing off {} for {:?}", self.host, wait);
            }
            Throttle::Keep => {}
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn politeness(delay_ms: u64) -> Politeness {
        Politeness::new(
            Duration::from_millis(delay_ms),
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_override_and_floor() {
        let politeness = politeness(1000)
            .with_override("*.example.com", Duration::from_millis(300))
            .with_override("slow.example.com", Duration::from_millis(5000));

        assert_eq!(politeness.delay_for("other.org"), Duration::from_millis(1000));
        assert_eq!(politeness.delay_for("a.example.com"), Duration::from_millis(300));
        assert_eq!(politeness.delay_for("slow.example.com"), Duration::from_millis(5000));

        politeness.raise_delay("a.example.com", Duration::from_secs(2));
        politeness.raise_delay("a.example.com", Duration::from_millis(100));
        assert_eq!(politeness.delay_for("a.example.com"), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_same_host_is_spaced() {
        let politeness = politeness(80);

        let started = Instant::now();
        politeness.acquire("example.com").await.release(Throttle::Clear);
        politeness.acquire("example.com").await.release(Throttle::Clear);

        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(politeness.request_count("example.com").await, 2);
    }

    #[tokio::test]
    async fn test_different_hosts_do_not_wait() {
        let politeness = politeness(5_000);

        let started = Instant::now();
        politeness.acquire("a.example.com").await.release(Throttle::Clear);
        politeness.acquire("b.example.com").await.release(Throttle::Clear);

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_backoff_delays_next_request() {
        let politeness = politeness(0);

        politeness
            .acquire("example.com")
            .await
            .release(Throttle::Backoff(Some(Duration::from_millis(120))));

        let started = Instant::now();
        politeness.acquire("example.com").await.release(Throttle::Clear);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
