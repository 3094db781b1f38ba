//! Client configuration.
//!
//! [`ClientConfig`] is plain data: it can be built in code, or deserialized
//! from JSON with every field optional.
//!
//! ```
//! use refetch::config::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "ttl_ms": 60000, "max_attempts": 5 }"#).unwrap();
//! assert_eq!(config.max_attempts, 5);
//! assert_eq!(config.timeout_ms, 7000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
    },
}

/// Defaults for every request a [`FetchClient`](crate::client::FetchClient) makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// How long a cached response is served without touching the network.
    pub ttl_ms: u64,
    /// Attempts per request, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each retry after it.
    pub base_backoff_ms: u64,
    /// Upper bound on a single attempt.
    pub timeout_ms: u64,
    /// Random delay in `[0, max_jitter_ms)` added to every backoff.
    pub max_jitter_ms: u64,
    /// Send `If-None-Match` with the cached ETag and accept `304 Not Modified`.
    pub use_etag: bool,
    /// Keep expired entries so their ETag can still revalidate them.
    pub retain_stale: bool,
    /// `Accept` header sent with every request, if any.
    pub accept: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            max_attempts: 3,
            base_backoff_ms: 500,
            timeout_ms: 7000,
            max_jitter_ms: 200,
            use_etag: true,
            retain_stale: true,
            accept: Some("application/json".to_owned()),
        }
    }
}

impl ClientConfig {
    /// Parses and validates a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ttl_ms",
                requirement: "greater than zero",
            });
        }
        self.retry_policy().validate()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}
