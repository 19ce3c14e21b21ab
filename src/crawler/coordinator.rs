//! Crawl coordinator - wires configuration, storage and the driver together
//!
//! The coordinator owns the parts of a run that outlive the process:
//! - restoring the frontier from the last checkpoint (or clearing it on `--fresh`)
//! - seeding the frontier from every configured site
//! - putting Failed entries back in play on `--retry-failed`
//! - recording the run in the run history
//!
//! The store stays open for the coordinator's lifetime so the run record can
//! be finished after the driver returns; `close` releases it.

use crate::config::Config;
use crate::crawler::driver::{Driver, DriverOptions, DriverState, Pipeline, RunReport};
use crate::crawler::fetcher::Fetcher;
use crate::extract::ExtractorRegistry;
use crate::frontier::Frontier;
use crate::state::EntryState;
use crate::storage::{open_store, FrontierStore, RunLog, RunStatus, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Start-up choices made on the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Discard the stored frontier before seeding
    pub fresh: bool,
    /// Return Failed entries under the retry limit to Pending
    pub retry_failed: bool,
}

/// Main crawler coordinator structure
#[derive(Debug)]
pub struct Coordinator {
    config: Config,
    config_hash: String,
    store: Arc<SqliteStore>,
    options: RunOptions,
}

impl Coordinator {
    /// Opens the configured database and creates a coordinator for it
    pub fn new(config: Config, config_hash: String, options: RunOptions) -> crate::Result<Self> {
        let store = open_store(Path::new(&config.output.database_path))?;
        Ok(Self::with_store(
            config,
            config_hash,
            Arc::new(store),
            options,
        ))
    }

    pub fn with_store(
        config: Config,
        config_hash: String,
        store: Arc<SqliteStore>,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            config_hash,
            store,
            options,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Builds a driver over the restored and seeded frontier
    pub fn prepare(&self) -> crate::Result<Driver> {
        let registry = ExtractorRegistry::from_config(&self.config)?;
        let fetcher = Fetcher::new(&self.config)?;
        let frontier = Frontier::new();

        if let Some(previous) = self.store.latest_run()? {
            if previous.status == RunStatus::Running {
                warn!(
                    "Run {} did not finish; resuming from its last checkpoint",
                    previous.id
                );
            }
        }

        if self.options.fresh {
            self.store.clear_frontier()?;
            info!("Cleared stored frontier");
        } else {
            let restored = frontier.restore(self.store.load_frontier()?);
            if restored > 0 {
                let counts = frontier.counts();
                info!(
                    "Restored {} frontier entries ({} pending, {} done, {} failed)",
                    restored, counts.pending, counts.done, counts.failed
                );
            }
        }

        let mut seeded = 0;
        for site in &self.config.sites {
            for seed in &site.seeds {
                if frontier.enqueue(seed)? {
                    seeded += 1;
                }
            }
        }
        info!("Seeded {} new URLs", seeded);

        if self.options.retry_failed {
            let limit = self.config.crawler.retry_limit;
            let mut requeued = 0;
            for entry in frontier.entries_in(EntryState::Failed) {
                if entry.retries() < limit {
                    frontier.retry_failed(&entry.url)?;
                    requeued += 1;
                }
            }
            info!("Returned {} failed URLs to the queue", requeued);
        }

        let checkpoints: Arc<dyn FrontierStore> = self.store.clone();
        let pipeline = Pipeline::new(
            Arc::new(frontier),
            Arc::new(fetcher),
            Arc::new(registry),
            self.store.clone(),
        )
        .with_checkpoints(checkpoints);

        Ok(Driver::new(
            pipeline,
            DriverOptions::from_config(&self.config.crawler),
        ))
    }

    /// Runs a prepared driver and records the run in the history
    pub async fn run_driver(&self, driver: &mut Driver) -> crate::Result<RunReport> {
        let run_id = self.store.create_run(&self.config_hash)?;
        info!("Run {} started", run_id);

        let result = driver.run().await;

        let status = match &result {
            Ok(report) if report.state == DriverState::Completed => RunStatus::Completed,
            _ => RunStatus::Aborted,
        };
        self.store.finish_run(run_id, status, &driver.metadata())?;
        info!("Run {} {}", run_id, status.to_db_string());

        result
    }

    /// Prepares and runs a crawl
    pub async fn run(&self) -> crate::Result<RunReport> {
        let mut driver = self.prepare()?;
        self.run_driver(&mut driver).await
    }

    /// Closes the store once the run is recorded
    ///
    /// Drivers built by `prepare` hold the store too; drop them first, or the
    /// connection closes only when the last of them goes.
    pub fn close(self) -> crate::Result<()> {
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close()?,
            Err(_) => debug!("Store still shared, closing when the last handle drops"),
        }
        Ok(())
    }
}
