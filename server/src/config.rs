//! Configuration management for the server.

use std::env;
use std::time::Duration;

/// Longest a changes request may be held open unless configured otherwise.
pub const DEFAULT_LONGPOLL_MAX_MS: u64 = 60_000;

pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Bearer token every request must carry; anonymous access when unset
    pub auth_secret: Option<String>,
    /// Upper bound on a long-poll `timeout`, in milliseconds
    pub longpoll_max_ms: u64,
    /// Size of the Postgres connection pool
    pub db_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let longpoll_max_ms = match env::var("LONGPOLL_MAX_MS") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidLongPoll)?,
            Err(_) => DEFAULT_LONGPOLL_MAX_MS,
        };

        let db_max_connections = match env::var("DB_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidMaxConnections)?,
            Err(_) => DEFAULT_DB_MAX_CONNECTIONS,
        };

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            longpoll_max_ms,
            db_max_connections,
        })
    }

    /// Configuration for an in-process server without a database.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: String::new(),
            auth_secret: None,
            longpoll_max_ms: DEFAULT_LONGPOLL_MAX_MS,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }

    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    /// Clamp a requested long-poll timeout.
    pub fn longpoll(&self, requested_ms: u64) -> Duration {
        Duration::from_millis(requested_ms.min(self.longpoll_max_ms))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid LONGPOLL_MAX_MS value")]
    InvalidLongPoll,

    #[error("Invalid DB_MAX_CONNECTIONS value")]
    InvalidMaxConnections,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longpoll_is_clamped() {
        let mut config = Config::local();
        config.longpoll_max_ms = 1_000;
        assert_eq!(config.longpoll(250), Duration::from_millis(250));
        assert_eq!(config.longpoll(90_000), Duration::from_millis(1_000));
    }
}
