//! Remote endpoint configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// How to authenticate against a remote replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    Bearer { token: String },
    Basic { username: String, password: String },
}

/// Where and how to replicate. Immutable for the duration of a sync call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteEndpointConfig {
    /// Base URL of the remote replica server
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Documents per replication batch
    pub batch_size: usize,
    /// Whether live sessions retry transient failures
    pub retry: bool,
    /// Carried for transport compatibility; live sessions back off per
    /// [`RetryPolicy::live_session`](crate::RetryPolicy::live_session)
    pub retry_delay_ms: u64,
    /// Longest a live session waits on the remote changes feed
    pub heartbeat_ms: u64,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Ask for gzip-compressed responses
    pub compression: bool,
}

impl Default for RemoteEndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            credentials: None,
            batch_size: 25,
            retry: true,
            retry_delay_ms: 5_000,
            heartbeat_ms: 10_000,
            timeout_ms: 30_000,
            compression: true,
        }
    }
}

impl RemoteEndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Bearer {
            token: token.into(),
        });
        self
    }

    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("TANDEM_REMOTE_URL").map_err(|_| ConfigError::MissingUrl)?;
        let mut config = Self::new(url);

        if let Ok(token) = env::var("TANDEM_REMOTE_TOKEN") {
            config = config.with_bearer(token);
        }
        if let Ok(value) = env::var("TANDEM_BATCH_SIZE") {
            config.batch_size = parse_var("TANDEM_BATCH_SIZE", &value)?;
        }
        if let Ok(value) = env::var("TANDEM_HEARTBEAT_MS") {
            config.heartbeat_ms = parse_var("TANDEM_HEARTBEAT_MS", &value)?;
        }
        if let Ok(value) = env::var("TANDEM_TIMEOUT_MS") {
            config.timeout_ms = parse_var("TANDEM_TIMEOUT_MS", &value)?;
        }
        if let Ok(value) = env::var("TANDEM_RETRY") {
            config.retry = parse_var("TANDEM_RETRY", &value)?;
        }

        Ok(config)
    }

    /// Copy with per-call overrides applied.
    pub fn with_overrides(&self, overrides: &EndpointOverrides) -> Self {
        let mut config = self.clone();
        if let Some(url) = &overrides.url {
            config.url = url.clone();
        }
        if let Some(credentials) = &overrides.credentials {
            config.credentials = Some(credentials.clone());
        }
        if let Some(batch_size) = overrides.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(retry) = overrides.retry {
            config.retry = retry;
        }
        if let Some(retry_delay_ms) = overrides.retry_delay_ms {
            config.retry_delay_ms = retry_delay_ms;
        }
        if let Some(heartbeat_ms) = overrides.heartbeat_ms {
            config.heartbeat_ms = heartbeat_ms;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(compression) = overrides.compression {
            config.compression = compression;
        }
        config
    }

    /// Batch size, never below one.
    pub fn batch_limit(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-call partial override of a [`RemoteEndpointConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointOverrides {
    pub url: Option<String>,
    pub credentials: Option<Credentials>,
    pub batch_size: Option<usize>,
    pub retry: Option<bool>,
    pub retry_delay_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub compression: Option<bool>,
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name, value.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TANDEM_REMOTE_URL environment variable is required")]
    MissingUrl,

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
