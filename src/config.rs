//! Runtime configuration.
//!
//! Values come from CLI flags (with environment fallbacks handled by clap);
//! everything else falls back to the defaults below.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default backend base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8000/";

/// Default user id sent with start-session
pub const DEFAULT_USER_ID: &str = "anonymous";

/// Timeout for start/end session requests
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connect timeout for the long-lived stream request
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Transport-level retries for the start-session call
pub const DEFAULT_START_RETRIES: usize = 2;

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL, always ending in `/`
    pub api_url: Url,
    pub user_id: String,
    /// Root directory of the repository cache
    pub cache_dir: PathBuf,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub start_retries: usize,
}

impl Config {
    /// Build a configuration, filling unset values with defaults.
    pub fn new(api_url: &str, user_id: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };

        Ok(Self {
            api_url: parse_base_url(api_url)?,
            user_id: user_id.to_string(),
            cache_dir,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            start_retries: DEFAULT_START_RETRIES,
        })
    }
}

/// `<user cache dir>/vulnscan/repos`
pub fn default_cache_dir() -> Result<PathBuf> {
    Ok(dirs::cache_dir()
        .context("Could not determine cache directory")?
        .join("vulnscan")
        .join("repos"))
}

/// Parse a base URL, adding a trailing slash so relative joins keep the path.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).with_context(|| format!("Invalid API URL: {}", raw))
}
