//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// What to do when a transfer would leave the debited account negative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverdraftPolicy {
    /// Abort the unit of work with an invariant violation
    Reject,
    /// Let the balance go negative
    Allow,
}

impl FromStr for OverdraftPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(OverdraftPolicy::Reject),
            "allow" => Ok(OverdraftPolicy::Allow),
            _ => Err(()),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    /// Upper bound on a single row-lock wait inside a unit of work
    pub lock_timeout: Duration,

    /// Deadline applied to a transfer when the caller supplies none
    pub transfer_timeout: Duration,

    /// Automatic retries of a transfer that failed transiently
    pub transfer_max_retries: u32,

    pub overdraft_policy: OverdraftPolicy,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let lock_timeout_ms: u64 = parse_or(&lookup, "LOCK_TIMEOUT_MS", 5_000)?;
        let transfer_timeout_ms: u64 = parse_or(&lookup, "TRANSFER_TIMEOUT_MS", 10_000)?;
        if lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("LOCK_TIMEOUT_MS"));
        }
        if transfer_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("TRANSFER_TIMEOUT_MS"));
        }

        let transfer_max_retries = parse_or(&lookup, "TRANSFER_MAX_RETRIES", 3)?;

        let overdraft_policy = parse_or(&lookup, "OVERDRAFT_POLICY", OverdraftPolicy::Reject)?;

        let log_format = parse_or(&lookup, "LOG_FORMAT", LogFormat::Pretty)?;

        Ok(Self {
            database_url,
            database_max_connections,
            environment,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            transfer_timeout: Duration::from_millis(transfer_timeout_ms),
            transfer_max_retries,
            overdraft_policy,
            log_format,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
