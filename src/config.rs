use std::time::Duration;

use thiserror::Error;

use crate::limits::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Process settings, read once at startup and passed to whatever needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    /// Upper bound on every repository call.
    pub query_timeout: Duration,
    pub mail_queue_capacity: usize,
    pub mail_send_timeout: Duration,
    pub mail_from: String,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("BOOKINGS_DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("BOOKINGS_DATABASE_URL"))?;
        let max_connections =
            parse_or(&lookup, "BOOKINGS_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let query_timeout_ms =
            parse_or(&lookup, "BOOKINGS_QUERY_TIMEOUT_MS", DEFAULT_QUERY_TIMEOUT_MS)?;
        let mail_queue_capacity =
            parse_or(&lookup, "BOOKINGS_MAIL_QUEUE_CAPACITY", DEFAULT_MAIL_QUEUE_CAPACITY)?;
        let mail_send_timeout_ms =
            parse_or(&lookup, "BOOKINGS_MAIL_SEND_TIMEOUT_MS", DEFAULT_MAIL_SEND_TIMEOUT_MS)?;
        let metrics_port = match lookup("BOOKINGS_METRICS_PORT") {
            Some(raw) => Some(parse(&raw, "BOOKINGS_METRICS_PORT")?),
            None => None,
        };

        if max_connections == 0 {
            return Err(invalid("BOOKINGS_MAX_CONNECTIONS", "0"));
        }
        if query_timeout_ms == 0 {
            return Err(invalid("BOOKINGS_QUERY_TIMEOUT_MS", "0"));
        }
        if mail_queue_capacity == 0 {
            return Err(invalid("BOOKINGS_MAIL_QUEUE_CAPACITY", "0"));
        }

        Ok(Self {
            database_url,
            max_connections,
            query_timeout: Duration::from_millis(query_timeout_ms),
            mail_queue_capacity,
            mail_send_timeout: Duration::from_millis(mail_send_timeout_ms),
            mail_from: lookup("BOOKINGS_MAIL_FROM").unwrap_or_else(|| "me@here.com".into()),
            metrics_port,
        })
    }
}

fn parse<T: std::str::FromStr>(raw: &str, var: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(var, raw))
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) => parse(&raw, var),
        None => Ok(default),
    }
}

fn invalid(var: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
    }
}
