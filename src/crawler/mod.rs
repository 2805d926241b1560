//! Crawler module for keeping documents up to date
//!
//! This module contains the core refresh logic, including:
//! - Seed import from JSON metadata files
//! - Lease-based job claiming
//! - HTTP fetching with conditional requests
//! - Applying fetch outcomes and rescheduling
//! - The per-worker scheduler loop

mod applier;
mod fetcher;
mod lease;
mod seeds;
mod worker;

pub use applier::{truncate_error, CheckResult, OutcomeApplier, MAX_ERROR_LEN};
pub use fetcher::{build_http_client, content_hash, fetch_document, FetchOutcome, MAX_REDIRECTS};
pub use lease::{Job, JobKind, LeaseManager};
pub use seeds::{
    guess_source, import_seed_files, import_seeds, import_seeds_at, parse_seed_records,
    read_seed_file, SeedRecord,
};
pub use worker::{
    default_owner, idle_interval, JobReport, JobResult, Worker, PROGRESS_INTERVAL,
};

use crate::config::Config;
use crate::output::CrawlCounters;
use crate::storage::{SqliteRepository, StorageResult};
use crate::CrawlError;
use std::path::Path;
use tokio::sync::watch;

/// Opens the shared repository named in the configuration
pub fn open_repository(config: &Config) -> StorageResult<SqliteRepository> {
    SqliteRepository::open(
        Path::new(&config.repository.database_path),
        std::time::Duration::from_millis(config.repository.busy_timeout_ms),
    )
}

/// Runs a complete worker session
///
/// This is the main entry point for a worker process. It will:
/// 1. Open the shared repository
/// 2. Import the configured seed files
/// 3. Build the HTTP client
/// 4. Lease, fetch and apply until `shutdown` turns true
/// 5. Close the repository; a failed close is logged and does not discard the counters
///
/// # Returns
///
/// * `Ok(CrawlCounters)` - The counters of the finished session
/// * `Err(CrawlError)` - Setup failed
pub async fn run_crawl(
    config: &Config,
    owner: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<CrawlCounters, CrawlError> {
    let mut repo = open_repository(config)?;

    if !config.seeds.metadata_paths.is_empty() {
        let inserted = import_seed_files(&mut repo, &config.seeds.metadata_paths)?;
        tracing::info!("Seed import finished: {} new documents", inserted);
    }

    let client = build_http_client(&config.fetch)?;
    let mut worker = Worker::from_config(repo, client, owner, config);
    worker.run(shutdown).await;

    Ok(worker.shut_down())
}
