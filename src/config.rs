// src/config.rs

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("either AUTH_SERVICE_URL or JWT_SECRET must be set")]
    NoAuth,
}

/// How bearer credentials are checked.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Delegate to the auth service at this base URL.
    Remote(String),
    /// Verify HS256 tokens locally with this secret.
    LocalJwt(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub auth: AuthMode,
    pub stats_service_url: Option<String>,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    pub cors_origin: Option<String>,
    /// Per-call bound for auth and stats requests.
    pub outbound_timeout: Duration,
    pub stats_max_attempts: u32,
    pub stats_retry_backoff: Duration,
    pub default_time_limit_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;

        // The remote auth service wins when both are configured.
        let auth = match (optional("AUTH_SERVICE_URL"), optional("JWT_SECRET")) {
            (Some(url), _) => AuthMode::Remote(url),
            (None, Some(secret)) => AuthMode::LocalJwt(secret),
            (None, None) => return Err(ConfigError::NoAuth),
        };

        Ok(Self {
            database_url,
            auth,
            stats_service_url: optional("STATS_SERVICE_URL"),
            rust_log: optional("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            bind_addr: parsed("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            cors_origin: optional("CORS_ORIGIN"),
            outbound_timeout: Duration::from_millis(parsed("OUTBOUND_TIMEOUT_MS", 2000)?),
            stats_max_attempts: parsed("STATS_MAX_ATTEMPTS", 3)?,
            stats_retry_backoff: Duration::from_millis(parsed("STATS_RETRY_BACKOFF_MS", 200)?),
            default_time_limit_secs: parsed("DEFAULT_TIME_LIMIT_SECS", 600)?,
        })
    }

    /// Worst case time spent on one stats event: every attempt times out and backs off.
    pub fn stats_deadline(&self) -> Duration {
        (self.outbound_timeout + self.stats_retry_backoff) * self.stats_max_attempts.max(1)
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
