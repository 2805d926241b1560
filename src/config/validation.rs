use crate::config::types::{
    Config, FetchConfig, LeaseConfig, RepositoryConfig, SeedConfig, MAX_INTERVAL_SECS,
};
use crate::ConfigError;

/// Minimum slack between the fetch timeout and the lease TTL (seconds)
///
/// A lease that can expire while its fetch is still in flight lets a second worker
/// take the same document.
pub const LEASE_SAFETY_MARGIN_SECS: u64 = 30;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_repository_config(&config.repository)?;
    validate_fetch_config(&config.fetch)?;
    validate_lease_config(&config.lease, &config.fetch)?;
    validate_seed_config(&config.seeds)?;
    Ok(())
}

/// Validates repository configuration
fn validate_repository_config(config: &RepositoryConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetch configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    // Header values must be visible ASCII
    if !config
        .user_agent
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control())
    {
        return Err(ConfigError::Validation(format!(
            "user_agent must be printable ASCII, got '{}'",
            config.user_agent
        )));
    }

    if config.timeout_secs < 1 || config.timeout_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be between 1 and 600, got {}",
            config.timeout_secs
        )));
    }

    if config.delay_ms > 60_000 {
        return Err(ConfigError::Validation(format!(
            "delay_ms must be <= 60000ms, got {}ms",
            config.delay_ms
        )));
    }

    Ok(())
}

/// Validates lease configuration against the fetch timeout
fn validate_lease_config(config: &LeaseConfig, fetch: &FetchConfig) -> Result<(), ConfigError> {
    let minimum_ttl = fetch.timeout_secs + LEASE_SAFETY_MARGIN_SECS;
    if config.lease_ttl_secs < minimum_ttl {
        return Err(ConfigError::Validation(format!(
            "lease_ttl_secs must be at least timeout_secs + {} ({}), got {}",
            LEASE_SAFETY_MARGIN_SECS, minimum_ttl, config.lease_ttl_secs
        )));
    }

    for (name, value) in [
        ("lease_ttl_secs", config.lease_ttl_secs),
        ("refetch_interval_secs", config.refetch_interval_secs),
        ("retry_interval_secs", config.retry_interval_secs),
    ] {
        if value > MAX_INTERVAL_SECS {
            return Err(ConfigError::Validation(format!(
                "{} must be <= {}, got {}",
                name, MAX_INTERVAL_SECS, value
            )));
        }
    }

    if config.refetch_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "refetch_interval_secs must be >= 1".to_string(),
        ));
    }

    if config.retry_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "retry_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates seed configuration
fn validate_seed_config(config: &SeedConfig) -> Result<(), ConfigError> {
    if config.metadata_paths.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "metadata_paths cannot contain empty paths".to_string(),
        ));
    }

    Ok(())
}
