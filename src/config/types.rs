use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Leasecrawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub seeds: SeedConfig,
}

/// Shared document repository configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the SQLite database file shared by all workers
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// How long a worker waits on a locked database before giving up (milliseconds)
    #[serde(rename = "busy-timeout-ms", default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Pause between consecutive jobs of one worker (milliseconds)
    #[serde(rename = "delay-ms", default = "default_delay_ms")]
    pub delay_ms: u64,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Lease and rescheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// How long a lease stays valid after it is taken (seconds)
    #[serde(rename = "lease-ttl-secs", default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Delay before a successfully fetched document is checked again (seconds)
    #[serde(rename = "refetch-interval-secs", default = "default_refetch_interval_secs")]
    pub refetch_interval_secs: u64,

    /// Delay before a failed document is retried (seconds)
    #[serde(rename = "retry-interval-secs", default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

/// Seed import configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    /// JSON metadata files listing seed URLs
    #[serde(rename = "metadata-paths", default)]
    pub metadata_paths: Vec<String>,
}

impl FetchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LeaseConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        secs(self.lease_ttl_secs)
    }

    pub fn refetch_interval(&self) -> chrono::Duration {
        secs(self.refetch_interval_secs)
    }

    pub fn retry_interval(&self) -> chrono::Duration {
        secs(self.retry_interval_secs)
    }
}

/// Upper bound accepted for any interval setting (ten years)
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 3600;

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_INTERVAL_SECS) as i64)
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl_secs(),
            refetch_interval_secs: default_refetch_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_delay_ms() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("leasecrawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_lease_ttl_secs() -> u64 {
    600
}

fn default_refetch_interval_secs() -> u64 {
    7 * 24 * 3600
}

fn default_retry_interval_secs() -> u64 {
    15 * 60
}
