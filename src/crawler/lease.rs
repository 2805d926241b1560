//! Lease manager
//!
//! Hands out at most one job per call. Work is claimed by writing a time-bounded lease onto
//! the record through the repository's conditional update, so two workers can never hold the
//! same document at once and a crashed worker's claim lapses on its own.

use crate::config::LeaseConfig;
use crate::storage::{
    self, DocumentFilter, DocumentRecord, DocumentUpdate, Lease, Repository, SortOrder,
    StorageResult,
};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Which leasing phase produced a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// The document has never been fetched successfully
    FirstFetch,
    /// The document is due for a re-check
    Refetch,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstFetch => f.write_str("first fetch"),
            Self::Refetch => f.write_str("refetch"),
        }
    }
}

/// A leased document together with the phase it was claimed in
#[derive(Debug, Clone)]
pub struct Job {
    /// The record as it reads after the lease was written
    pub document: DocumentRecord,
    pub kind: JobKind,
}

impl Job {
    pub fn norm_url(&self) -> &str {
        &self.document.norm_url
    }
}

/// Claims work for one worker
#[derive(Debug, Clone)]
pub struct LeaseManager {
    lease_ttl: Duration,
}

impl LeaseManager {
    pub fn new(lease_ttl: Duration) -> Self {
        Self { lease_ttl }
    }

    pub fn from_config(config: &LeaseConfig) -> Self {
        Self::new(config.lease_ttl())
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Leases the next eligible document for `owner`, or returns `None` when nothing is due
    pub fn take_job<R: Repository + ?Sized>(
        &self,
        repo: &mut R,
        owner: &str,
    ) -> StorageResult<Option<Job>> {
        self.take_job_at(repo, owner, storage::now())
    }

    /// Same as [`take_job`](Self::take_job) with an explicit clock reading
    ///
    /// New work is tried first, oldest seed first. Only when none is eligible does the
    /// most overdue refetch get claimed.
    pub fn take_job_at<R: Repository + ?Sized>(
        &self,
        repo: &mut R,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Job>> {
        let update = DocumentUpdate::AcquireLease(Lease {
            owner: owner.to_string(),
            until: now + self.lease_ttl,
            taken_at: now,
        });

        let phases = [
            (
                JobKind::FirstFetch,
                DocumentFilter::NewWork { now },
                SortOrder::CreatedAtAsc,
            ),
            (
                JobKind::Refetch,
                DocumentFilter::RefetchWork { now },
                SortOrder::NextRefetchAtAsc,
            ),
        ];

        for (kind, filter, order) in phases {
            if let Some(document) = repo.find_one_and_update(&filter, &update, order)? {
                tracing::debug!("Leased {} for {} ({})", document.norm_url, owner, kind);
                return Ok(Some(Job { document, kind }));
            }
        }

        Ok(None)
    }
}
