//! Scheduler loop
//!
//! One worker runs strictly sequentially: lease a job, fetch it, apply the outcome. Any number
//! of workers, in this process or others, may share a repository; they coordinate only through
//! the leases written on the documents.

use crate::config::Config;
use crate::crawler::applier::{CheckResult, OutcomeApplier};
use crate::crawler::fetcher::{fetch_document, FetchOutcome};
use crate::crawler::lease::{Job, JobKind, LeaseManager};
use crate::output::CrawlCounters;
use crate::storage::{Repository, StorageResult};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::watch;

/// Counters are logged each time this many jobs have been processed
pub const PROGRESS_INTERVAL: u64 = 50;

const MIN_IDLE: Duration = Duration::from_millis(500);
const MAX_IDLE: Duration = Duration::from_secs(5);

/// Pause taken when no work is eligible or the repository is unavailable
pub fn idle_interval(delay: Duration) -> Duration {
    delay.clamp(MIN_IDLE, MAX_IDLE)
}

/// Owner id identifying this process in leases: `<hostname>:<pid>`
pub fn default_owner() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}:{}", host, std::process::id())
}

/// How one job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// A body was stored for a document that had none
    Fetched,
    /// A refetch found different content
    Changed,
    /// A refetch found the stored copy current
    Unchanged,
    /// The attempt failed with this message
    Failed(String),
}

/// Summary of one processed job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub norm_url: String,
    pub kind: JobKind,
    pub result: JobResult,
    /// False when the lease had been lost and the outcome was discarded
    pub committed: bool,
}

/// A single crawl worker
pub struct Worker<R: Repository> {
    repo: R,
    client: Client,
    owner: String,
    leases: LeaseManager,
    applier: OutcomeApplier,
    delay: Duration,
    counters: CrawlCounters,
}

impl<R: Repository> Worker<R> {
    pub fn new(
        repo: R,
        client: Client,
        owner: impl Into<String>,
        leases: LeaseManager,
        applier: OutcomeApplier,
        delay: Duration,
    ) -> Self {
        Self {
            repo,
            client,
            owner: owner.into(),
            leases,
            applier,
            delay,
            counters: CrawlCounters::default(),
        }
    }

    pub fn from_config(repo: R, client: Client, owner: impl Into<String>, config: &Config) -> Self {
        Self::new(
            repo,
            client,
            owner,
            LeaseManager::from_config(&config.lease),
            OutcomeApplier::from_config(&config.lease),
            config.fetch.delay(),
        )
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn counters(&self) -> CrawlCounters {
        self.counters
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Hands the repository back for teardown
    pub fn into_repository(self) -> R {
        self.repo
    }

    /// Closes the repository and returns the run counters
    ///
    /// A failed close is logged; the counters are returned either way.
    pub fn shut_down(self) -> CrawlCounters {
        let counters = self.counters;
        if let Err(e) = self.repo.close() {
            tracing::error!("Worker {} failed to close the repository: {}", self.owner, e);
        }
        counters
    }

    /// Runs one lease → fetch → apply cycle
    ///
    /// Returns `None` when no work was eligible. Fetch failures are recorded on the document
    /// and reported in the result; only repository failures surface as errors.
    pub async fn run_once(&mut self) -> StorageResult<Option<JobReport>> {
        let Some(job) = self.leases.take_job(&mut self.repo, &self.owner)? else {
            return Ok(None);
        };

        self.counters.processed += 1;
        tracing::debug!("Fetching {} ({})", job.norm_url(), job.kind);

        let outcome = fetch_document(&self.client, &job).await;
        let report = self.apply(&job, outcome)?;

        match &report.result {
            JobResult::Fetched => self.counters.fetched += 1,
            JobResult::Changed => self.counters.changed += 1,
            JobResult::Unchanged => self.counters.unchanged += 1,
            JobResult::Failed(_) => self.counters.errors += 1,
        }

        if !report.committed {
            tracing::warn!(
                "Lease on {} was lost before its outcome was recorded",
                report.norm_url
            );
        }

        Ok(Some(report))
    }

    fn apply(&mut self, job: &Job, outcome: FetchOutcome) -> StorageResult<JobReport> {
        let norm_url = job.norm_url();

        let (result, committed) = match outcome {
            FetchOutcome::NotModified {
                etag,
                last_modified,
            } => {
                let check = CheckResult {
                    status_code: 304,
                    body: None,
                    etag,
                    last_modified,
                    changed: Some(false),
                };
                let committed =
                    self.applier
                        .on_success(&mut self.repo, norm_url, &self.owner, &check)?;
                (JobResult::Unchanged, committed)
            }
            FetchOutcome::Fetched {
                status_code,
                body,
                etag,
                last_modified,
                changed,
                ..
            } => {
                let result = match (job.kind, changed) {
                    (JobKind::Refetch, Some(true)) => JobResult::Changed,
                    (JobKind::Refetch, Some(false)) => JobResult::Unchanged,
                    _ => JobResult::Fetched,
                };
                // Identical content is recorded like a 304: the stored body stays as is
                let body = (result != JobResult::Unchanged).then_some(body);
                let check = CheckResult {
                    status_code,
                    body,
                    etag,
                    last_modified,
                    changed,
                };
                let committed =
                    self.applier
                        .on_success(&mut self.repo, norm_url, &self.owner, &check)?;
                (result, committed)
            }
            FetchOutcome::Failed { error } => {
                tracing::warn!("Fetch of {} failed: {}", norm_url, error);
                let committed =
                    self.applier
                        .on_error(&mut self.repo, norm_url, &self.owner, &error)?;
                (JobResult::Failed(error), committed)
            }
        };

        tracing::debug!("{} ({}): {:?}", norm_url, job.kind, result);

        Ok(JobReport {
            norm_url: norm_url.to_string(),
            kind: job.kind,
            result,
            committed,
        })
    }

    /// Processes jobs until `shutdown` turns true
    ///
    /// The in-flight job always completes; leases are never released on exit and lapse
    /// through their TTL instead. A dropped shutdown sender also stops the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> CrawlCounters {
        tracing::info!("Worker {} started", self.owner);

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let pause = match self.run_once().await {
                Ok(Some(_)) => {
                    if self.counters.processed % PROGRESS_INTERVAL == 0 {
                        tracing::info!("Progress: {}", self.counters);
                    }
                    self.delay
                }
                Ok(None) => {
                    tracing::trace!("No eligible work");
                    idle_interval(self.delay)
                }
                Err(e) => {
                    tracing::error!("Repository error: {}; backing off", e);
                    idle_interval(self.delay)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Worker {} stopped: {}", self.owner, self.counters);
        self.counters
    }
}
