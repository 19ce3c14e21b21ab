//! Configuration module for Dredge
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use dredge::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("dredge.toml")).unwrap();
//! println!("Crawling {} site(s) with {} worker(s)", config.sites.len(), config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, ExtractorConfig, FieldRule, JsonConfig, JsonFieldRule, LinksConfig,
    OutputConfig, SelectorConfig, SiteConfig, UserAgentConfig, ValueKind,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
