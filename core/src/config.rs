//! Client configuration parsed from environment variables.

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 5;

pub const ENV_TIMEOUT_SECS: &str = "COURIER_TIMEOUT_SECS";
pub const ENV_PING_INTERVAL_SECS: &str = "COURIER_PING_INTERVAL_SECS";
pub const ENV_USER_AGENT: &str = "COURIER_USER_AGENT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Timeout applied to requests that do not set their own.
    pub timeout: Duration,
    /// Interval between keep-alive pings while more than one socket is open.
    pub ping_interval: Duration,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `COURIER_TIMEOUT_SECS`: default 60
    /// - `COURIER_PING_INTERVAL_SECS`: default 5
    /// - `COURIER_USER_AGENT`: default `courier/<version>`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout = parse_secs(ENV_TIMEOUT_SECS, lookup(ENV_TIMEOUT_SECS), DEFAULT_TIMEOUT_SECS)?;
        let ping_interval = parse_secs(
            ENV_PING_INTERVAL_SECS,
            lookup(ENV_PING_INTERVAL_SECS),
            DEFAULT_PING_INTERVAL_SECS,
        )?;
        let user_agent = lookup(ENV_USER_AGENT)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_user_agent);

        Ok(Self {
            timeout,
            ping_interval,
            user_agent,
        })
    }
}

fn default_user_agent() -> String {
    format!("courier/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_secs(key: &str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default));
    };
    let invalid = |reason: &str| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
        reason: reason.to_string(),
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(&e.to_string()))?;
    if secs == 0 {
        return Err(invalid("must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}
