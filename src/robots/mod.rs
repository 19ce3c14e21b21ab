//! Robots.txt handling module
//!
//! robots.txt is fetched at most once per origin per run and kept in memory.
//! A missing, unreachable or broken robots.txt allows everything.

mod parser;

pub use parser::ParsedRobots;

use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// Per-run cache of robots.txt files keyed by origin
#[derive(Debug)]
pub struct RobotsCache {
    client: Client,
    /// Product token matched against `User-agent` groups
    agent: String,
    timeout: Duration,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<ParsedRobots>>>>>,
}

impl RobotsCache {
    pub fn new(client: Client, agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            agent: agent.into(),
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Returns the robots.txt for a URL's origin, fetching it on first use
    ///
    /// Concurrent callers for the same origin share a single fetch.
    pub async fn get(&self, url: &Url) -> Arc<ParsedRobots> {
        let origin = url.origin().ascii_serialization();

        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(origin.clone()).or_default())
        };

        cell.get_or_init(|| async {
            Arc::new(fetch_robots(&self.client, &origin, self.timeout).await)
        })
        .await
        .clone()
    }

    /// Checks a URL against its origin's robots.txt
    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.get(url).await.is_allowed(url.as_str(), &self.agent)
    }

    /// Crawl-delay for the URL's origin, if robots.txt sets one
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.get(url).await.crawl_delay(&self.agent)
    }
}

/// Fetches `{origin}/robots.txt`
///
/// Anything other than a successful response yields `ParsedRobots::allow_all`.
pub async fn fetch_robots(client: &Client, origin: &str, timeout: Duration) -> ParsedRobots {
    let robots_url = format!("{}/robots.txt", origin);

    let response = match client.get(&robots_url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Could not fetch {}: {}", robots_url, e);
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        tracing::debug!("{} returned {}, allowing all", robots_url, response.status());
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => {
            tracing::debug!("Loaded {} ({} bytes)", robots_url, body.len());
            ParsedRobots::from_content(&body)
        }
        Err(e) => {
            tracing::warn!("Could not read {}: {}", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
