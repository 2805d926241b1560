//! Leasing eligibility predicates
//!
//! The lease manager's two phases select records through these predicates; the SQLite
//! backend renders the same conditions in SQL. An absent timestamp never blocks a record.

use crate::storage::DocumentRecord;
use chrono::{DateTime, Utc};

/// True when no valid lease is held on the record
///
/// An expired lease that is still stored counts as free; this is how work held by a
/// crashed worker is reclaimed.
pub fn lease_is_free(doc: &DocumentRecord, now: DateTime<Utc>) -> bool {
    doc.lock.as_ref().map_or(true, |lock| !lock.is_valid_at(now))
}

/// True unless a retry is scheduled in the future
pub fn retry_is_due(doc: &DocumentRecord, now: DateTime<Utc>) -> bool {
    doc.next_retry_at.map_or(true, |at| at <= now)
}

/// True unless a re-check is scheduled in the future
pub fn refetch_is_due(doc: &DocumentRecord, now: DateTime<Utc>) -> bool {
    doc.next_refetch_at.map_or(true, |at| at <= now)
}

/// Phase one: the record has never been fetched successfully
pub fn is_new_work(doc: &DocumentRecord, now: DateTime<Utc>) -> bool {
    doc.fetched_at.is_none() && retry_is_due(doc, now) && lease_is_free(doc, now)
}

/// Phase two: the record was fetched before and is due for a re-check
pub fn is_refetch_work(doc: &DocumentRecord, now: DateTime<Utc>) -> bool {
    doc.fetched_at.is_some()
        && refetch_is_due(doc, now)
        && retry_is_due(doc, now)
        && lease_is_free(doc, now)
}
