use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Missing `[fetch]`, `[lease]` and `[seeds]` sections fall back to their defaults;
/// `[repository]` is required.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use leasecrawl::config::load_config;
///
/// let config = load_config(Path::new("leasecrawl.toml")).unwrap();
/// println!("Lease TTL: {}s", config.lease.lease_ttl_secs);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so runs of different workers can be matched to the same settings.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(content_digest(&std::fs::read_to_string(path)?))
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always describes the settings that were parsed.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, content_digest(&content)))
}

fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
