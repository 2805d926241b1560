//! State module for the document lifecycle
//!
//! # Components
//!
//! - `DocumentState`: where a document sits in its lifecycle at a given instant
//! - `eligibility`: the predicates deciding whether a document may be leased

mod document_state;
pub mod eligibility;

// Re-export main types
pub use document_state::DocumentState;
