//! Statistics generation from the document repository
//!
//! This module provides the per-worker run counters logged by the crawl loop and the
//! repository-wide summary printed by `--stats`.

use crate::state::DocumentState;
use crate::storage::{Repository, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Counters for the jobs one worker has handled since it started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    /// Jobs leased and attempted
    pub processed: u64,

    /// Bodies stored for documents that had none
    pub fetched: u64,

    /// Refetches whose content differed from the stored copy
    pub changed: u64,

    /// Refetches confirmed current (304 or identical content)
    pub unchanged: u64,

    /// Attempts recorded as failures
    pub errors: u64,
}

impl fmt::Display for CrawlCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} fetched={} changed={} unchanged={} errors={}",
            self.processed, self.fetched, self.changed, self.unchanged, self.errors
        )
    }
}

/// Repository statistics summary
#[derive(Debug, Clone)]
pub struct RepositoryStatistics {
    /// When the counts were taken
    pub taken_at: DateTime<Utc>,

    /// Total number of documents
    pub total_documents: u64,

    /// Count of documents by lifecycle state
    pub documents_by_state: HashMap<DocumentState, u64>,

    /// Documents whose last attempt failed
    pub failing_documents: u64,

    /// Documents whose last comparison detected a change
    pub changed_documents: u64,
}

impl RepositoryStatistics {
    pub fn count(&self, state: DocumentState) -> u64 {
        self.documents_by_state.get(&state).copied().unwrap_or(0)
    }
}

/// Loads statistics from the repository as of `now`
pub fn load_statistics<R: Repository + ?Sized>(
    repo: &R,
    now: DateTime<Utc>,
) -> StorageResult<RepositoryStatistics> {
    Ok(RepositoryStatistics {
        taken_at: now,
        total_documents: repo.count_documents()?,
        documents_by_state: repo.count_by_state(now)?,
        failing_documents: repo.count_failing()?,
        changed_documents: repo.count_changed()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RepositoryStatistics) {
    println!("=== Repository Statistics ===\n");

    println!("Overview:");
    println!("  Taken at: {}", stats.taken_at.to_rfc3339());
    println!("  Total documents: {}", stats.total_documents);
    println!("  Failing: {}", stats.failing_documents);
    println!("  Changed on last check: {}", stats.changed_documents);
    println!();

    println!("Documents by State:");
    for state in DocumentState::ALL {
        let count = stats.count(state);
        let percentage = if stats.total_documents > 0 {
            (count as f64 / stats.total_documents as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
}
