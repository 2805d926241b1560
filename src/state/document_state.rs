/// Document state definitions for tracking crawl progress
///
/// A document's state is derived from its stored fields and the current time; it is
/// never stored itself.
use crate::state::eligibility;
use crate::storage::DocumentRecord;
use chrono::{DateTime, Utc};
use std::fmt;

/// Represents where a document sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    /// Seeded but never fetched successfully
    AwaitingFirstFetch,

    /// A worker holds a valid lease on it
    Leased,

    /// Fetched at least once; waiting for (or due for) a re-check
    AwaitingRefetch,

    /// The last attempt failed and the retry time has not arrived
    AwaitingRetry,
}

impl DocumentState {
    /// All states, in lifecycle order
    pub const ALL: [DocumentState; 4] = [
        Self::AwaitingFirstFetch,
        Self::Leased,
        Self::AwaitingRefetch,
        Self::AwaitingRetry,
    ];

    /// Classifies a document as of `now`
    ///
    /// A valid lease takes precedence, then a pending retry, then the fetch history.
    pub fn of(doc: &DocumentRecord, now: DateTime<Utc>) -> Self {
        if !eligibility::lease_is_free(doc, now) {
            Self::Leased
        } else if !eligibility::retry_is_due(doc, now) {
            Self::AwaitingRetry
        } else if doc.fetched_at.is_none() {
            Self::AwaitingFirstFetch
        } else {
            Self::AwaitingRefetch
        }
    }

    /// Converts the state to the label used in storage queries
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::AwaitingFirstFetch => "awaiting_first_fetch",
            Self::Leased => "leased",
            Self::AwaitingRefetch => "awaiting_refetch",
            Self::AwaitingRetry => "awaiting_retry",
        }
    }

    /// Parses a state from its storage label
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "awaiting_first_fetch" => Some(Self::AwaitingFirstFetch),
            "leased" => Some(Self::Leased),
            "awaiting_refetch" => Some(Self::AwaitingRefetch),
            "awaiting_retry" => Some(Self::AwaitingRetry),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AwaitingFirstFetch => "awaiting first fetch",
            Self::Leased => "leased",
            Self::AwaitingRefetch => "awaiting refetch",
            Self::AwaitingRetry => "awaiting retry",
        };
        f.write_str(label)
    }
}
