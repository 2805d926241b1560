//! Outcome applier
//!
//! Commits the result of a fetch back onto the document and releases the lease. Every write
//! is conditioned on the caller still being the lease owner; a worker whose lease lapsed and
//! was taken over writes nothing.

use crate::config::LeaseConfig;
use crate::crawler::fetcher::content_hash;
use crate::storage::{
    self, DocumentFilter, DocumentUpdate, FailureUpdate, Repository, SortOrder, StorageResult,
    StoredBody, SuccessUpdate,
};
use chrono::{DateTime, Duration, Utc};

/// Longest error message stored on a document, in characters
pub const MAX_ERROR_LEN: usize = 500;

/// What a successful check reports back to the repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub status_code: u16,
    /// Present when the body should replace the stored copy
    pub body: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub changed: Option<bool>,
}

/// Applies fetch outcomes and reschedules documents
#[derive(Debug, Clone)]
pub struct OutcomeApplier {
    refetch_interval: Duration,
    retry_interval: Duration,
}

impl OutcomeApplier {
    pub fn new(refetch_interval: Duration, retry_interval: Duration) -> Self {
        Self {
            refetch_interval,
            retry_interval,
        }
    }

    pub fn from_config(config: &LeaseConfig) -> Self {
        Self::new(config.refetch_interval(), config.retry_interval())
    }

    /// Records a successful check and schedules the next one
    ///
    /// Returns false, writing nothing, when `owner` no longer holds the lease.
    pub fn on_success<R: Repository + ?Sized>(
        &self,
        repo: &mut R,
        norm_url: &str,
        owner: &str,
        check: &CheckResult,
    ) -> StorageResult<bool> {
        self.on_success_at(repo, norm_url, owner, check, storage::now())
    }

    pub fn on_success_at<R: Repository + ?Sized>(
        &self,
        repo: &mut R,
        norm_url: &str,
        owner: &str,
        check: &CheckResult,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let update = DocumentUpdate::RecordSuccess(SuccessUpdate {
            status_code: check.status_code,
            checked_at: now,
            next_refetch_at: now + self.refetch_interval,
            etag: check.etag.clone(),
            last_modified: check.last_modified.clone(),
            body: check.body.as_ref().map(|html| StoredBody {
                html: html.clone(),
                content_hash: content_hash(html),
            }),
            changed: check.changed,
        });

        let applied = commit(repo, norm_url, owner, &update)?;
        if !applied {
            tracing::debug!(
                "Lease on {} is no longer held by {}; success not recorded",
                norm_url,
                owner
            );
        }
        Ok(applied)
    }

    /// Records a failed attempt and schedules a retry
    ///
    /// Returns false, writing nothing, when `owner` no longer holds the lease.
    pub fn on_error<R: Repository + ?Sized>(
        &self,
        repo: &mut R,
        norm_url: &str,
        owner: &str,
        message: &str,
    ) -> StorageResult<bool> {
        self.on_error_at(repo, norm_url, owner, message, storage::now())
    }

    pub fn on_error_at<R: Repository + ?Sized>(
        &self,
        repo: &mut R,
        norm_url: &str,
        owner: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let update = DocumentUpdate::RecordFailure(FailureUpdate {
            error: truncate_error(message),
            failed_at: now,
            next_retry_at: now + self.retry_interval,
        });

        let applied = commit(repo, norm_url, owner, &update)?;
        if !applied {
            tracing::debug!(
                "Lease on {} is no longer held by {}; failure not recorded",
                norm_url,
                owner
            );
        }
        Ok(applied)
    }
}

fn commit<R: Repository + ?Sized>(
    repo: &mut R,
    norm_url: &str,
    owner: &str,
    update: &DocumentUpdate,
) -> StorageResult<bool> {
    let filter = DocumentFilter::LeasedBy {
        norm_url: norm_url.to_string(),
        owner: owner.to_string(),
    };
    Ok(repo
        .find_one_and_update(&filter, update, SortOrder::Unordered)?
        .is_some())
}

/// Cuts a message to at most [`MAX_ERROR_LEN`] characters
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
