//! Statistics from the crawl database
//!
//! Backs `--stats`: recent runs, the stored frontier by state, and record
//! counts per collection.

use crate::frontier::FrontierCounts;
use crate::storage::{FrontierStore, RunLog, RunRecord, Sink, StorageResult};

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Most recent runs first
    pub runs: Vec<RunRecord>,

    /// Stored frontier entries by state
    pub frontier: FrontierCounts,

    /// Failed URLs and their last error
    pub failed: Vec<(String, Option<String>)>,

    /// (collection, record count), sorted by collection
    pub collections: Vec<(String, u64)>,
}

impl CrawlStatistics {
    pub fn total_records(&self) -> u64 {
        self.collections.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from a store that keeps records, checkpoints and run history
pub fn load_statistics<S>(store: &S, run_limit: usize) -> StorageResult<CrawlStatistics>
where
    S: Sink + FrontierStore + RunLog,
{
    let runs = store.list_runs(run_limit)?;

    let entries = store.load_frontier()?;
    let frontier = FrontierCounts::tally(&entries);
    let failed = entries
        .into_iter()
        .filter(|entry| entry.state == crate::state::EntryState::Failed)
        .map(|entry| (entry.url, entry.last_error))
        .collect();

    let mut collections = Vec::new();
    for name in store.collections()? {
        let count = store.count(Some(&name))?;
        collections.push((name, count));
    }

    Ok(CrawlStatistics {
        runs,
        frontier,
        failed,
        collections,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Runs:");
    if stats.runs.is_empty() {
        println!("  (none)");
    }
    for run in &stats.runs {
        println!(
            "  #{} {} started {}{}",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.finished_at
                .as_deref()
                .map(|finished| format!(", finished {}", finished))
                .unwrap_or_default()
        );
        println!(
            "     {} pages, {} written, {} unchanged, {} skipped, {} retries, {} failures",
            run.pages_fetched,
            run.records_written,
            run.records_unchanged,
            run.records_skipped,
            run.retries,
            run.failures
        );
    }
    println!();

    let frontier = &stats.frontier;
    let total = frontier.total();
    println!("Frontier ({} URLs):", total);
    for (label, count) in [
        ("Pending", frontier.pending),
        ("InFlight", frontier.in_flight),
        ("Done", frontier.done),
        ("Failed", frontier.failed),
    ] {
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    if !stats.failed.is_empty() {
        println!("Failed URLs ({}):", stats.failed.len());
        for (url, error) in stats.failed.iter().take(20) {
            println!("  - {} ({})", url, error.as_deref().unwrap_or("unknown"));
        }
        println!();
    }

    println!("Records ({} total):", stats.total_records());
    for (collection, count) in &stats.collections {
        println!("  {}: {}", collection, count);
    }
}
