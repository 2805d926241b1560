//! Storage traits and error types
//!
//! This module defines the trait interface for repository backends together with the
//! filter, update and ordering values accepted by the conditional find-and-update.

use crate::state::{eligibility, DocumentState};
use crate::storage::{DocumentRecord, Lease, NewSeed};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Selects the records a conditional update may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFilter {
    /// Never fetched, not waiting on a retry, not validly leased
    NewWork { now: DateTime<Utc> },

    /// Fetched before, due for re-check, not waiting on a retry, not validly leased
    RefetchWork { now: DateTime<Utc> },

    /// The record with this key, leased by this owner
    LeasedBy { norm_url: String, owner: String },
}

impl DocumentFilter {
    /// Evaluates the filter against a record held in memory
    ///
    /// Backends must select exactly the records for which this returns true.
    pub fn matches(&self, doc: &DocumentRecord) -> bool {
        match self {
            Self::NewWork { now } => eligibility::is_new_work(doc, *now),
            Self::RefetchWork { now } => eligibility::is_refetch_work(doc, *now),
            Self::LeasedBy { norm_url, owner } => {
                doc.norm_url == *norm_url
                    && doc.lock.as_ref().is_some_and(|lock| lock.owner == *owner)
            }
        }
    }
}

/// Ordering hint deciding which matching record is picked first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Unordered,
    /// Oldest seeds first
    CreatedAtAsc,
    /// Most overdue first
    NextRefetchAtAsc,
}

/// Body fields written by a successful fetch that retrieved content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBody {
    pub html: String,
    pub content_hash: String,
}

/// Fields written after a successful check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessUpdate {
    pub status_code: u16,
    pub checked_at: DateTime<Utc>,
    pub next_refetch_at: DateTime<Utc>,
    /// Overwrites the stored value only when present
    pub etag: Option<String>,
    /// Overwrites the stored value only when present
    pub last_modified: Option<String>,
    /// When present, also sets `fetched_at` and `changed` (even to absent)
    pub body: Option<StoredBody>,
    pub changed: Option<bool>,
}

/// Fields written after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

/// Mutation applied by the conditional find-and-update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentUpdate {
    AcquireLease(Lease),
    /// Commits a success and releases the lease
    RecordSuccess(SuccessUpdate),
    /// Records a failure, bumps `fail_count` and releases the lease
    RecordFailure(FailureUpdate),
}

/// Trait for repository backend implementations
///
/// A repository handle is owned by one worker; sharing between workers happens
/// through the underlying store, never through in-process state.
pub trait Repository {
    /// Gets a document by its normalized URL
    fn get_document(&self, norm_url: &str) -> StorageResult<Option<DocumentRecord>>;

    /// Inserts a seed if its key is new, otherwise refreshes only `meta` and `updated_at`
    ///
    /// Returns true when a new record was created.
    fn upsert_seed(&mut self, seed: &NewSeed) -> StorageResult<bool>;

    /// Atomically finds one record matching `filter`, applies `update` to it and returns
    /// the post-update record
    ///
    /// When several records match, the first under `order` is chosen. The search and the
    /// write form one indivisible operation: no other caller can modify the chosen record
    /// between them, so two callers racing for one record cannot both see it match.
    /// Returns `None` when nothing matches; nothing is written then.
    fn find_one_and_update(
        &mut self,
        filter: &DocumentFilter,
        update: &DocumentUpdate,
        order: SortOrder,
    ) -> StorageResult<Option<DocumentRecord>>;

    /// Gets total document count
    fn count_documents(&self) -> StorageResult<u64>;

    /// Counts documents by lifecycle state as of `now`
    fn count_by_state(&self, now: DateTime<Utc>) -> StorageResult<HashMap<DocumentState, u64>>;

    /// Counts documents whose last attempt failed
    fn count_failing(&self) -> StorageResult<u64>;

    /// Counts documents whose last comparison detected a change
    fn count_changed(&self) -> StorageResult<u64>;

    /// Releases the underlying store
    fn close(self) -> StorageResult<()>
    where
        Self: Sized;
}
