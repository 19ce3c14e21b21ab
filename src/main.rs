//! Dredge main entry point
//!
//! Command-line interface for crawling, inspecting and exporting.

use anyhow::{bail, Context};
use clap::Parser;
use dredge::config::{load_config_with_hash, Config};
use dredge::crawler::{Coordinator, DriverState, RunOptions};
use dredge::extract::ExtractorRegistry;
use dredge::output::{export_collection, load_statistics, print_statistics, ExportFormat};
use dredge::storage::open_store;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Dredge: a polite, resumable crawl-and-extract pipeline
///
/// Dredge crawls paginated catalogue and listing sites, extracts records with
/// per-site extractors, and upserts them into a SQLite database keyed by each
/// record's natural key. Interrupted runs resume from the stored frontier.
#[derive(Parser, Debug)]
#[command(name = "dredge")]
#[command(version)]
#[command(about = "A polite, resumable crawl-and-extract pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard the stored frontier and start from the seeds
    #[arg(long)]
    fresh: bool,

    /// Give failed URLs under the retry limit another attempt
    #[arg(long)]
    retry_failed: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Export stored records (csv, json or jsonl) and exit
    #[arg(long, value_name = "FORMAT", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<ExportFormat>,

    /// Only export this site
    #[arg(long, value_name = "NAME", requires = "export")]
    site: Option<String>,

    /// Export destination: a file with --site, otherwise a directory
    #[arg(long, value_name = "PATH", requires = "export")]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(format) = cli.export {
        handle_export(&config, format, cli.site.as_deref(), cli.out.as_deref())
    } else {
        let options = RunOptions {
            fresh: cli.fresh,
            retry_failed: cli.retry_failed,
        };
        handle_crawl(config, config_hash, options).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("dredge=info,warn"),
            1 => EnvFilter::new("dredge=debug,info"),
            2 => EnvFilter::new("dredge=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let registry = ExtractorRegistry::from_config(config)?;
    let crawler = &config.crawler;

    println!("=== Dredge Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", crawler.workers);
    println!("  Retry limit: {}", crawler.retry_limit);
    println!(
        "  Page budget: {}",
        crawler
            .max_pages
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "  Time budget: {}",
        crawler
            .max_duration_secs
            .map(|n| format!("{}s", n))
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  Default delay: {}ms", crawler.default_delay_ms);
    println!("  Respect robots.txt: {}", crawler.respect_robots);

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSites ({}):", registry.len());
    for site in registry.sites() {
        let site_config = config.site(&site.name);
        let delay = site_config
            .and_then(|c| c.delay())
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "default".to_string());
        println!(
            "  - {} ({}) extractor: {}, delay: {}, headers: {}",
            site.name,
            site.pattern,
            site.extractor.kind(),
            delay,
            site.headers.len()
        );
        if let Some(site_config) = site_config {
            for seed in &site_config.seeds {
                println!("    * {}", seed);
            }
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling with {} seed URLs",
        config.sites.iter().map(|s| s.seeds.len()).sum::<usize>()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store, 10)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode
fn handle_export(
    config: &Config,
    format: ExportFormat,
    site: Option<&str>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(Path::new(&config.output.database_path))?;

    if let Some(name) = site {
        let Some(site) = config.site(name) else {
            bail!(dredge::DredgeError::UnknownSite(name.to_string()));
        };

        let written = match out {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Cannot create {}", path.display()))?;
                export_collection(
                    &store,
                    &site.name,
                    &site.export_fields,
                    format,
                    BufWriter::new(file),
                )?
            }
            None => export_collection(
                &store,
                &site.name,
                &site.export_fields,
                format,
                io::stdout().lock(),
            )?,
        };
        tracing::info!("Exported {} records for {}", written, site.name);
        return Ok(());
    }

    let dir = out.unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;

    for site in &config.sites {
        let path = dir.join(format!("{}.{}", site.name, format.extension()));
        let file =
            File::create(&path).with_context(|| format!("Cannot create {}", path.display()))?;
        let written = export_collection(
            &store,
            &site.name,
            &site.export_fields,
            format,
            BufWriter::new(file),
        )?;
        println!("✓ {} records -> {}", written, path.display());
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: String,
    options: RunOptions,
) -> anyhow::Result<()> {
    if options.fresh {
        tracing::info!("Starting fresh crawl (ignoring stored frontier)");
    } else {
        tracing::info!("Starting crawl (resuming stored frontier if any)");
    }

    let coordinator = Coordinator::new(config, config_hash, options)?;
    let mut driver = coordinator.prepare()?;

    let stop = driver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let report = coordinator
        .run_driver(&mut driver)
        .await
        .context("Crawl failed")?;
    drop(driver);
    coordinator.close().context("Failed to close the database")?;

    match report.state {
        DriverState::Completed => tracing::info!("Crawl completed"),
        state => tracing::warn!("Crawl {}; rerun to resume", state),
    }
    println!(
        "{}: {} pages, {} records written, {} unchanged, {} failures ({} pending, {} done, {} failed)",
        report.state,
        report.metadata.pages_fetched,
        report.metadata.records_written,
        report.metadata.records_unchanged,
        report.metadata.failures,
        report.frontier.pending,
        report.frontier.done,
        report.frontier.failed
    );

    Ok(())
}
