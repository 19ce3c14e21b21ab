//! Dredge: a polite, resumable crawl-and-extract pipeline
//!
//! This crate crawls paginated catalogue and listing sites, extracts structured
//! records with per-site extractors, and upserts them into a store keyed by each
//! record's natural key. The crawl frontier deduplicates URLs, survives interrupted
//! runs, and every host is fetched politely.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod frontier;
pub mod output;
pub mod record;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Dredge operations
#[derive(Debug, Error)]
pub enum DredgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Export error: {0}")]
    Export(#[from] output::ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid selector for site '{site}': {message}")]
    InvalidSelector { site: String, message: String },

    #[error("Invalid header for site '{site}': {message}")]
    InvalidHeader { site: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Dredge operations
pub type Result<T> = std::result::Result<T, DredgeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, Driver, DriverState, RunReport, StopHandle};
pub use extract::{Extraction, Extractor, ExtractorRegistry};
pub use frontier::Frontier;
pub use record::Record;
pub use state::EntryState;
pub use storage::{Sink, SqliteStore};
pub use url::{extract_host, normalize_url};
