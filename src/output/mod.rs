//! Output module for crawl counters and repository summaries
//!
//! This module handles:
//! - Per-worker run counters reported by the crawl loop
//! - Repository-wide statistics for the `--stats` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlCounters, RepositoryStatistics};
