//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Leasecrawl database.
//! Timestamps are stored as Unix seconds so eligibility scans compare integers.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per distinct normalized URL
CREATE TABLE IF NOT EXISTS documents (
    norm_url TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    fetched_at INTEGER,
    last_checked_at INTEGER,
    status_code INTEGER,
    etag TEXT,
    last_modified TEXT,
    html TEXT,
    content_hash TEXT,
    changed INTEGER,
    fail_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_retry_at INTEGER,
    next_refetch_at INTEGER,
    lock_owner TEXT,
    lock_until INTEGER,
    lock_taken_at INTEGER,
    meta TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_documents_fetched_at ON documents(fetched_at);
CREATE INDEX IF NOT EXISTS idx_documents_next_refetch_at ON documents(next_refetch_at);
CREATE INDEX IF NOT EXISTS idx_documents_lock_until ON documents(lock_until);
CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
