//! URL handling module for Leasecrawl
//!
//! Every document in the repository is keyed by the normalized form of its URL, so the
//! normalizer must be pure and idempotent.

mod normalize;

pub use normalize::{normalize_url, try_normalize_url};
