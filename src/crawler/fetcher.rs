//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent and timeout
//! - Conditional GET requests on refetch jobs
//! - Redirect handling
//! - Content fingerprinting and change detection
//! - Error classification

use crate::config::FetchConfig;
use crate::crawler::lease::{Job, JobKind};
use reqwest::header::{
    HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{redirect::Policy, Client, StatusCode};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Maximum number of redirects followed for one request
pub const MAX_REDIRECTS: usize = 10;

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server confirmed the stored copy is current (HTTP 304)
    NotModified {
        etag: Option<String>,
        last_modified: Option<String>,
    },

    /// A body was retrieved
    Fetched {
        /// HTTP status code of the final response
        status_code: u16,
        body: String,
        /// SHA-256 hex fingerprint of `body`
        content_hash: String,
        etag: Option<String>,
        last_modified: Option<String>,
        /// Whether the fingerprint differs from the stored one; `None` without a stored one
        changed: Option<bool>,
    },

    /// HTTP error status or transport failure
    Failed { error: String },
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetch configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    let timeout = config.timeout();

    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// SHA-256 hex fingerprint of a document body
pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Fetches the document of a leased job
///
/// Exactly one attempt is made; retries happen through the repository's retry schedule.
///
/// | Condition | Outcome |
/// |-----------|---------|
/// | HTTP 304 | `NotModified` |
/// | HTTP 2xx/3xx | `Fetched` |
/// | Any other status | `Failed("HTTP <code>")` |
/// | Timeout | `Failed("timeout")` |
/// | Connection failure | `Failed("connection error: ..")` |
pub async fn fetch_document(client: &Client, job: &Job) -> FetchOutcome {
    let doc = &job.document;
    let url = if doc.url.is_empty() {
        doc.norm_url.as_str()
    } else {
        doc.url.as_str()
    };

    let mut request = client.get(url);
    if job.kind == JobKind::Refetch {
        if let Some(etag) = non_empty(&doc.etag) {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = non_empty(&doc.last_modified) {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return FetchOutcome::Failed {
                error: describe_error(&e),
            }
        }
    };

    let status = response.status();
    let etag = header_value(response.headers(), &ETAG);
    let last_modified = header_value(response.headers(), &LAST_MODIFIED);

    if status == StatusCode::NOT_MODIFIED {
        return FetchOutcome::NotModified {
            etag,
            last_modified,
        };
    }

    if !(status.is_success() || status.is_redirection()) {
        return FetchOutcome::Failed {
            error: format!("HTTP {}", status.as_u16()),
        };
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return FetchOutcome::Failed {
                error: describe_error(&e),
            }
        }
    };

    let fingerprint = content_hash(&body);
    let changed = non_empty(&doc.content_hash).map(|previous| previous != fingerprint);

    FetchOutcome::Fetched {
        status_code: status.as_u16(),
        body,
        content_hash: fingerprint,
        etag,
        last_modified,
        changed,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Short diagnostic for a transport failure
fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".to_string()
    } else if e.is_connect() {
        format!("connection error: {}", e)
    } else if e.is_redirect() {
        format!("redirect error: {}", e)
    } else {
        e.to_string()
    }
}
