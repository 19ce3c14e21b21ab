//! Crawler module: fetching, politeness and the crawl loop
//!
//! # Components
//!
//! - `Fetcher`: one HTTP request per call, classified into a `FetchStatus`
//! - `Politeness`: per-host spacing and backoff shared by every worker
//! - `Driver`: the worker loop and the retry-or-fail decision
//! - `Coordinator`: restores, seeds and records runs against the SQLite store

mod coordinator;
mod driver;
mod failure;
mod fetcher;
mod metadata;
mod politeness;

pub use coordinator::{Coordinator, RunOptions};
pub use driver::{AbortReason, Driver, DriverOptions, DriverState, Pipeline, RunReport, StopHandle};
pub use failure::CrawlFailure;
pub use fetcher::{build_http_client, FetchResult, FetchStatus, Fetcher};
pub use metadata::{RunCounters, RunMetadata};
pub use politeness::{HostSlot, Politeness, Throttle};
