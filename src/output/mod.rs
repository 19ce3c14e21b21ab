//! Output module: record exports and crawl statistics

mod export;
pub mod stats;

pub use export::{
    export_collection, export_records, resolve_header, ExportError, ExportFormat, KEY_COLUMN,
};
pub use stats::{load_statistics, print_statistics, CrawlStatistics};
