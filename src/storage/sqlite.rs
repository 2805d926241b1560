//! SQLite repository implementation
//!
//! This module provides a SQLite-based implementation of the Repository trait. Several
//! worker processes may open the same database file; the conditional find-and-update runs
//! inside a `BEGIN IMMEDIATE` transaction, which holds SQLite's single write lock from the
//! search through the write.

use crate::state::DocumentState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    DocumentFilter, DocumentUpdate, FailureUpdate, Repository, SortOrder, StorageError,
    StorageResult, SuccessUpdate,
};
use crate::storage::{DocumentRecord, Lease, NewSeed};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const DOCUMENT_COLUMNS: &str = "norm_url, url, source, created_at, updated_at, fetched_at,
     last_checked_at, status_code, etag, last_modified, html, content_hash, changed,
     fail_count, last_error, next_retry_at, next_refetch_at, lock_owner, lock_until,
     lock_taken_at, meta";

/// SQLite repository backend
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    /// Opens (or creates) the shared repository database
    ///
    /// `busy_timeout` bounds how long a call waits while another worker holds the
    /// write lock before failing with a storage error.
    pub fn open(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Set before anything else may contend for the lock
        conn.busy_timeout(busy_timeout)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory repository visible only to this handle
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Closes the underlying connection
    pub fn close(self) -> StorageResult<()> {
        self.conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}

impl Repository for SqliteRepository {
    fn get_document(&self, norm_url: &str) -> StorageResult<Option<DocumentRecord>> {
        select_document(&self.conn, norm_url)
    }

    fn upsert_seed(&mut self, seed: &NewSeed) -> StorageResult<bool> {
        let meta = serde_json::to_string(&seed.meta)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let seen_at = seed.seen_at.timestamp();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO documents (norm_url, url, source, created_at, updated_at, fail_count, meta)
             VALUES (?1, ?2, ?3, ?4, ?4, 0, ?5)
             ON CONFLICT(norm_url) DO NOTHING",
            params![seed.norm_url, seed.url, seed.source, seen_at, meta],
        )? == 1;

        if !inserted {
            tx.execute(
                "UPDATE documents SET meta = ?1, updated_at = ?2 WHERE norm_url = ?3",
                params![meta, seen_at, seed.norm_url],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn find_one_and_update(
        &mut self,
        filter: &DocumentFilter,
        update: &DocumentUpdate,
        order: SortOrder,
    ) -> StorageResult<Option<DocumentRecord>> {
        let (predicate, values) = filter_clause(filter);
        let sql = format!(
            "SELECT norm_url FROM documents WHERE {} {} LIMIT 1",
            predicate,
            order_clause(order)
        );

        // Dropping the transaction without commit rolls back
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .optional()?;

        let Some(norm_url) = candidate else {
            return Ok(None);
        };

        let assignments = match update {
            DocumentUpdate::AcquireLease(lease) => lease_assignments(lease),
            DocumentUpdate::RecordSuccess(success) => success_assignments(success),
            DocumentUpdate::RecordFailure(failure) => failure_assignments(failure),
        };
        let updated = assignments.execute(&tx, &norm_url)?;
        if updated != 1 {
            return Err(StorageError::Database(format!(
                "conditional update of {} touched {} rows",
                norm_url, updated
            )));
        }

        let document = select_document(&tx, &norm_url)?;
        tx.commit()?;

        Ok(document)
    }

    fn count_documents(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_by_state(&self, now: DateTime<Utc>) -> StorageResult<HashMap<DocumentState, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT CASE
                 WHEN lock_until IS NOT NULL AND lock_until > ?1 THEN 'leased'
                 WHEN next_retry_at IS NOT NULL AND next_retry_at > ?1 THEN 'awaiting_retry'
                 WHEN fetched_at IS NULL THEN 'awaiting_first_fetch'
                 ELSE 'awaiting_refetch'
             END AS state, COUNT(*)
             FROM documents GROUP BY state",
        )?;

        let rows = stmt
            .query_map(params![now.timestamp()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (label, count) in rows {
            let state = DocumentState::from_db_string(&label).ok_or_else(|| {
                StorageError::Database(format!("unknown document state '{}'", label))
            })?;
            counts.insert(state, count as u64);
        }

        Ok(counts)
    }

    fn count_failing(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE last_error IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_changed(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE changed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn close(self) -> StorageResult<()> {
        SqliteRepository::close(self)
    }
}

/// Renders a filter as a SQL predicate over `documents`
///
/// Must agree with `DocumentFilter::matches`. An absent `next_retry_at` or
/// `next_refetch_at` imposes no constraint; an expired lease counts as no lease.
fn filter_clause(filter: &DocumentFilter) -> (&'static str, Vec<Value>) {
    match filter {
        DocumentFilter::NewWork { now } => (
            "fetched_at IS NULL
             AND (next_retry_at IS NULL OR next_retry_at <= ?1)
             AND (lock_until IS NULL OR lock_until <= ?1)",
            vec![Value::Integer(now.timestamp())],
        ),
        DocumentFilter::RefetchWork { now } => (
            "fetched_at IS NOT NULL
             AND (next_refetch_at IS NULL OR next_refetch_at <= ?1)
             AND (next_retry_at IS NULL OR next_retry_at <= ?1)
             AND (lock_until IS NULL OR lock_until <= ?1)",
            vec![Value::Integer(now.timestamp())],
        ),
        DocumentFilter::LeasedBy { norm_url, owner } => (
            "norm_url = ?1 AND lock_owner = ?2",
            vec![Value::Text(norm_url.clone()), Value::Text(owner.clone())],
        ),
    }
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Unordered => "",
        SortOrder::CreatedAtAsc => "ORDER BY created_at ASC, norm_url ASC",
        SortOrder::NextRefetchAtAsc => "ORDER BY next_refetch_at ASC, norm_url ASC",
    }
}

/// Column assignments for a single-row UPDATE keyed by `norm_url`
struct Assignments {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Assignments {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            values: Vec::new(),
        }
    }

    fn set(&mut self, column: &str, value: Value) {
        self.values.push(value);
        self.clauses
            .push(format!("{} = ?{}", column, self.values.len()));
    }

    fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    fn release_lease(&mut self) {
        self.raw("lock_owner = NULL");
        self.raw("lock_until = NULL");
        self.raw("lock_taken_at = NULL");
    }

    fn execute(mut self, conn: &Connection, norm_url: &str) -> rusqlite::Result<usize> {
        self.values.push(Value::Text(norm_url.to_string()));
        let sql = format!(
            "UPDATE documents SET {} WHERE norm_url = ?{}",
            self.clauses.join(", "),
            self.values.len()
        );
        conn.execute(&sql, params_from_iter(self.values.iter()))
    }
}

fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::Integer(at.timestamp())
}

fn lease_assignments(lease: &Lease) -> Assignments {
    let mut assignments = Assignments::new();
    assignments.set("lock_owner", Value::Text(lease.owner.clone()));
    assignments.set("lock_until", timestamp_value(lease.until));
    assignments.set("lock_taken_at", timestamp_value(lease.taken_at));
    assignments
}

fn success_assignments(success: &SuccessUpdate) -> Assignments {
    let mut assignments = Assignments::new();
    assignments.set(
        "status_code",
        Value::Integer(i64::from(success.status_code)),
    );
    assignments.set("last_checked_at", timestamp_value(success.checked_at));
    assignments.set("updated_at", timestamp_value(success.checked_at));
    assignments.set("next_refetch_at", timestamp_value(success.next_refetch_at));
    assignments.raw("last_error = NULL");
    assignments.raw("next_retry_at = NULL");

    if let Some(etag) = &success.etag {
        assignments.set("etag", Value::Text(etag.clone()));
    }
    if let Some(last_modified) = &success.last_modified {
        assignments.set("last_modified", Value::Text(last_modified.clone()));
    }

    let changed = success
        .changed
        .map_or(Value::Null, |changed| Value::Integer(i64::from(changed)));
    match &success.body {
        Some(body) => {
            assignments.set("html", Value::Text(body.html.clone()));
            assignments.set("content_hash", Value::Text(body.content_hash.clone()));
            assignments.set("fetched_at", timestamp_value(success.checked_at));
            assignments.set("changed", changed);
        }
        None if success.changed.is_some() => assignments.set("changed", changed),
        None => {}
    }

    assignments.release_lease();
    assignments
}

fn failure_assignments(failure: &FailureUpdate) -> Assignments {
    let mut assignments = Assignments::new();
    assignments.set("last_error", Value::Text(failure.error.clone()));
    assignments.raw("fail_count = fail_count + 1");
    assignments.set("next_retry_at", timestamp_value(failure.next_retry_at));
    assignments.set("updated_at", timestamp_value(failure.failed_at));
    assignments.release_lease();
    assignments
}

fn select_document(conn: &Connection, norm_url: &str) -> StorageResult<Option<DocumentRecord>> {
    let sql = format!("SELECT {} FROM documents WHERE norm_url = ?1", DOCUMENT_COLUMNS);
    let document = conn
        .query_row(&sql, params![norm_url], row_to_document)
        .optional()?;
    Ok(document)
}

fn timestamp_from(idx: usize, secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    timestamp_from(idx, row.get(idx)?)
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|secs| timestamp_from(idx, secs))
        .transpose()
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let lock_owner: Option<String> = row.get(17)?;
    let lock_until = optional_timestamp_at(row, 18)?;
    let lock_taken_at = optional_timestamp_at(row, 19)?;
    let lock = match (lock_owner, lock_until) {
        (Some(owner), Some(until)) => Some(Lease {
            owner,
            until,
            taken_at: lock_taken_at.unwrap_or(until),
        }),
        _ => None,
    };

    let meta_text: String = row.get(20)?;
    let meta = serde_json::from_str(&meta_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(20, Type::Text, Box::new(e)))?;

    Ok(DocumentRecord {
        norm_url: row.get(0)?,
        url: row.get(1)?,
        source: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
        updated_at: timestamp_at(row, 4)?,
        fetched_at: optional_timestamp_at(row, 5)?,
        last_checked_at: optional_timestamp_at(row, 6)?,
        status_code: row.get(7)?,
        etag: row.get(8)?,
        last_modified: row.get(9)?,
        html: row.get(10)?,
        content_hash: row.get(11)?,
        changed: row.get(12)?,
        fail_count: row.get(13)?,
        last_error: row.get(14)?,
        next_retry_at: optional_timestamp_at(row, 15)?,
        next_refetch_at: optional_timestamp_at(row, 16)?,
        lock,
        meta,
    })
}
