//! Failure taxonomy
//!
//! The fetcher and extractors classify; only the driver decides between
//! retrying and giving up.

use crate::crawler::fetcher::FetchStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrawlFailure {
    /// The request did not finish within the timeout
    #[error("request timed out")]
    NetworkTimeout,

    /// 429, 5xx or a network error
    #[error("transient failure: {0}")]
    TransientHttp(String),

    /// Any other 4xx, robots denial, or no extractor for the host
    #[error("permanent failure: {0}")]
    PermanentHttp(String),

    /// An item that could not be extracted; never fails a page
    #[error("extraction: {0}")]
    Extraction(String),

    /// The sink rejected a record
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl CrawlFailure {
    /// Whether the driver may requeue the URL
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlFailure::NetworkTimeout
                | CrawlFailure::TransientHttp(_)
                | CrawlFailure::Persistence(_)
        )
    }

    /// Splits a fetch status into the page body and HTTP status, or the failure
    pub fn classify(status: FetchStatus) -> Result<(String, u16), CrawlFailure> {
        match status {
            FetchStatus::Ok { body, http_status } => Ok((body, http_status)),
            FetchStatus::Timeout => Err(CrawlFailure::NetworkTimeout),
            FetchStatus::TransientError {
                http_status,
                message,
                ..
            } => Err(CrawlFailure::TransientHttp(describe(http_status, &message))),
            FetchStatus::PermanentError {
                http_status,
                message,
            } => Err(CrawlFailure::PermanentHttp(describe(http_status, &message))),
        }
    }
}

fn describe(http_status: Option<u16>, message: &str) -> String {
    match http_status {
        Some(code) => format!("HTTP {} {}", code, message),
        None => message.to_string(),
    }
}
