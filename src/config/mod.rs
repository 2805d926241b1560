//! Configuration module for Leasecrawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use leasecrawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("leasecrawl.toml")).unwrap();
//! println!("Repository: {}", config.repository.database_path);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, FetchConfig, LeaseConfig, RepositoryConfig, SeedConfig};
pub use validation::LEASE_SAFETY_MARGIN_SECS;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
