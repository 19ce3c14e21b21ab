//! HTTP fetcher
//!
//! One call, one request. The fetcher waits for the host's politeness slot,
//! sends the request, and classifies the outcome. It never retries; backoff
//! after a 429/5xx only delays the host's next request.

use crate::config::Config;
use crate::crawler::politeness::{Politeness, Throttle};
use crate::robots::RobotsCache;
use crate::url::extract_host;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::time::Duration;
use url::Url;

/// How a fetch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// 2xx with the response body
    Ok { body: String, http_status: u16 },

    /// 429, 5xx or a network error; worth retrying later
    TransientError {
        http_status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other 4xx, a robots.txt denial, or a request that cannot be sent
    PermanentError {
        http_status: Option<u16>,
        message: String,
    },

    /// The request did not finish within the timeout
    Timeout,
}

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: Url,
    pub status: FetchStatus,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, FetchStatus::Ok { .. })
    }
}

#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    politeness: Politeness,
    robots: Option<RobotsCache>,
}

/// Builds the HTTP client shared by page and robots.txt requests
///
/// User agent format: `Name/Version (+ContactURL; ContactEmail)`.
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(config.crawler.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

impl Fetcher {
    /// Builds a fetcher with politeness settings and robots handling from config
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config)?;
        let crawler = &config.crawler;

        let mut politeness =
            Politeness::new(crawler.default_delay(), crawler.backoff(), crawler.max_backoff());
        for site in &config.sites {
            if let Some(delay) = site.delay() {
                politeness = politeness.with_override(site.domain.clone(), delay);
            }
        }

        let robots = crawler.respect_robots.then(|| {
            RobotsCache::new(
                client.clone(),
                config.user_agent.crawler_name.clone(),
                crawler.request_timeout(),
            )
        });

        Ok(Self::with_client(client, politeness, robots))
    }

    pub fn with_client(client: Client, politeness: Politeness, robots: Option<RobotsCache>) -> Self {
        Self {
            client,
            politeness,
            robots,
        }
    }

    pub fn politeness(&self) -> &Politeness {
        &self.politeness
    }

    /// Fetches one URL
    pub async fn fetch(&self, url: &Url, headers: &HeaderMap, timeout: Duration) -> FetchResult {
        let status = self.fetch_status(url, headers, timeout).await;
        FetchResult {
            url: url.clone(),
            status,
        }
    }

    async fn fetch_status(&self, url: &Url, headers: &HeaderMap, timeout: Duration) -> FetchStatus {
        let Some(host) = extract_host(url) else {
            return FetchStatus::PermanentError {
                http_status: None,
                message: format!("no host in {}", url),
            };
        };

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(url).await {
                tracing::info!("Disallowed by robots.txt: {}", url);
                return FetchStatus::PermanentError {
                    http_status: None,
                    message: "disallowed by robots.txt".to_string(),
                };
            }
            if let Some(delay) = robots.crawl_delay(url).await {
                self.politeness.raise_delay(&host, delay);
            }
        }

        let slot = self.politeness.acquire(&host).await;
        tracing::debug!("GET {}", url);

        let request = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .timeout(timeout);

        let status = match request.send().await {
            Ok(response) => classify_response(response).await,
            Err(e) => classify_error(&e),
        };

        let throttle = match &status {
            FetchStatus::Ok { .. } | FetchStatus::PermanentError { .. } => Throttle::Clear,
            FetchStatus::TransientError {
                http_status: Some(_),
                retry_after,
                ..
            } => Throttle::Backoff(*retry_after),
            FetchStatus::TransientError { .. } | FetchStatus::Timeout => Throttle::Keep,
        };
        slot.release(throttle);

        status
    }
}

async fn classify_response(response: Response) -> FetchStatus {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or("").to_string();

    if status.is_success() {
        return match response.text().await {
            Ok(body) => FetchStatus::Ok {
                body,
                http_status: status.as_u16(),
            },
            Err(e) => classify_error(&e),
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, Utc::now()));

        return FetchStatus::TransientError {
            http_status: Some(status.as_u16()),
            message: reason,
            retry_after,
        };
    }

    FetchStatus::PermanentError {
        http_status: Some(status.as_u16()),
        message: reason,
    }
}

fn classify_error(error: &reqwest::Error) -> FetchStatus {
    if error.is_timeout() {
        FetchStatus::Timeout
    } else if error.is_redirect() || error.is_builder() {
        FetchStatus::PermanentError {
            http_status: None,
            message: error.to_string(),
        }
    } else {
        FetchStatus::TransientError {
            http_status: None,
            message: error.to_string(),
            retry_after: None,
        }
    }
}

/// Parses a Retry-After value: delta seconds or an HTTP date
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
