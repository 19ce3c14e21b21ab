//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `EntryState`: the lifecycle of a frontier entry (pending, in flight, done, failed)
//! - `HostState`: per-host politeness bookkeeping (last fetch, backoff)

mod entry_state;
mod host_state;

pub use entry_state::EntryState;
pub use host_state::HostState;
