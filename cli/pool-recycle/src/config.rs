//! Environment configuration.
//!
//! The API endpoint and token come from the same variables the tsuru client
//! exports, so an authenticated shell needs no extra setup.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;

/// API endpoint variable.
pub const TARGET_VAR: &str = "TSURU_TARGET";

/// API token variable.
pub const TOKEN_VAR: &str = "TSURU_TOKEN";

/// Request timeout override, in seconds.
pub const TIMEOUT_VAR: &str = "POOL_RECYCLE_HTTP_TIMEOUT_SECS";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TSURU_TARGET or TSURU_TOKEN envs not set")]
    MissingCredentials,

    #[error("TSURU_TARGET must be an absolute http(s) URL, got {value:?}")]
    InvalidTarget { value: String },
}

/// Connection settings for the orchestration API.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: Url,
    pub token: String,

    /// Timeout of every request except the workload migration stream.
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let (Some(target), Some(token)) = (present(TARGET_VAR), present(TOKEN_VAR)) else {
            return Err(ConfigError::MissingCredentials);
        };

        let target = parse_target(target.trim())?;

        let http_timeout = match present(TIMEOUT_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(var = TIMEOUT_VAR, value = %raw, "Ignoring invalid HTTP timeout");
                    DEFAULT_HTTP_TIMEOUT
                }
            },
            None => DEFAULT_HTTP_TIMEOUT,
        };

        Ok(Self {
            target,
            token: token.trim().to_string(),
            http_timeout,
        })
    }
}

fn parse_target(value: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidTarget {
        value: value.to_string(),
    };

    let url = Url::parse(value).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}
