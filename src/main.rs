//! Leasecrawl main entry point
//!
//! This is the command-line interface for one Leasecrawl worker process.

use anyhow::Context;
use clap::Parser;
use leasecrawl::config::{load_config_with_hash, Config};
use leasecrawl::crawler::{default_owner, import_seed_files, open_repository, run_crawl};
use leasecrawl::output::{load_statistics, print_statistics};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Leasecrawl: a lease-coordinated document refresher
///
/// Each process is one worker. Start as many as needed against the same database; they
/// share work through time-bounded leases and never fetch the same document at once.
#[derive(Parser, Debug)]
#[command(name = "leasecrawl")]
#[command(version)]
#[command(about = "A lease-coordinated document refresher", long_about = None)]
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

    /// Lease owner id (defaults to <hostname>:<pid>)
    #[arg(long, value_name = "ID")]
    owner: Option<String>,

    /// Validate config and print it without touching the database
    #[arg(long, conflicts_with_all = ["stats", "import_only"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "import_only"])]
    stats: bool,

    /// Import the configured seed files and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    import_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.import_only {
        handle_import(&config)?;
    } else {
        let owner = cli.owner.unwrap_or_else(default_owner);
        handle_crawl(&config, &owner).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("leasecrawl=info,warn"),
            1 => EnvFilter::new("leasecrawl=debug,info"),
            2 => EnvFilter::new("leasecrawl=trace,debug"),
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

/// Handles the --dry-run mode: prints the validated configuration
fn handle_dry_run(config: &Config) {
    println!("=== Leasecrawl Dry Run ===\n");

    println!("Repository:");
    println!("  Database: {}", config.repository.database_path);
    println!("  Busy timeout: {}ms", config.repository.busy_timeout_ms);

    println!("\nFetch:");
    println!("  User agent: {}", config.fetch.user_agent);
    println!("  Timeout: {}s", config.fetch.timeout_secs);
    println!("  Delay between jobs: {}ms", config.fetch.delay_ms);

    println!("\nLeases:");
    println!("  Lease TTL: {}s", config.lease.lease_ttl_secs);
    println!("  Refetch interval: {}s", config.lease.refetch_interval_secs);
    println!("  Retry interval: {}s", config.lease.retry_interval_secs);

    println!("\nSeed Files ({}):", config.seeds.metadata_paths.len());
    for path in &config.seeds.metadata_paths {
        println!("  - {}", path);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.repository.database_path);

    let repo = open_repository(config).context("failed to open the repository")?;
    let stats = load_statistics(&repo, leasecrawl::storage::now())?;
    print_statistics(&stats);
    repo.close()?;

    Ok(())
}

/// Handles the --import-only mode: imports seeds without crawling
fn handle_import(config: &Config) -> anyhow::Result<()> {
    let mut repo = open_repository(config).context("failed to open the repository")?;
    let inserted = import_seed_files(&mut repo, &config.seeds.metadata_paths)?;
    repo.close()?;

    println!("✓ Imported {} new documents", inserted);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, owner: &str) -> anyhow::Result<()> {
    tracing::info!("Starting worker {}", owner);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown requested; finishing the in-flight job");
        let _ = shutdown_tx.send(true);
    });

    let counters = run_crawl(config, owner, shutdown_rx)
        .await
        .context("crawl failed")?;

    println!("Final summary: {}", counters);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
