//! Storage module for the shared document repository
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent seed upserts
//! - The atomic conditional find-and-update used for leasing and outcome commits
//! - Repository-wide counts for statistics

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteRepository;
pub use traits::{
    DocumentFilter, DocumentUpdate, FailureUpdate, Repository, SortOrder, StorageError,
    StorageResult, StoredBody, SuccessUpdate,
};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};

/// Current time at the resolution the repository stores (whole seconds)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// A time-bounded claim on a document held by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: String,
    pub until: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl Lease {
    /// A lease is valid strictly before its expiry instant
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }
}

/// Represents a document in the repository
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub norm_url: String,
    pub url: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub html: Option<String>,
    pub content_hash: Option<String>,
    pub changed: Option<bool>,
    pub fail_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub next_refetch_at: Option<DateTime<Utc>>,
    pub lock: Option<Lease>,
    pub meta: Map<String, Value>,
}

impl DocumentRecord {
    /// A record as the seed importer creates it: no fetch history, no lease
    pub fn new_seeded(norm_url: &str, source: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            norm_url: norm_url.to_string(),
            url: norm_url.to_string(),
            source: source.to_string(),
            created_at,
            updated_at: created_at,
            fetched_at: None,
            last_checked_at: None,
            status_code: None,
            etag: None,
            last_modified: None,
            html: None,
            content_hash: None,
            changed: None,
            fail_count: 0,
            last_error: None,
            next_retry_at: None,
            next_refetch_at: None,
            lock: None,
            meta: Map::new(),
        }
    }
}

/// A seed to upsert into the repository
///
/// `norm_url`, `url` and `source` are only written when the record is created;
/// `meta` and the update time are written on every import.
#[derive(Debug, Clone)]
pub struct NewSeed {
    pub norm_url: String,
    pub url: String,
    pub source: String,
    pub meta: Map<String, Value>,
    pub seen_at: DateTime<Utc>,
}
