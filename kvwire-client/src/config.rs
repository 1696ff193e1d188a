//! # Client Configuration
//!
//! Purpose: Describe where the server lives and how many connections a
//! client may hold, either from code, from a deserialized document or from
//! environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of pooled connection slots.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Stream kind used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// `host:port` over TCP.
    #[default]
    Tcp,
    /// Filesystem path of a unix domain socket.
    Unix,
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "unix" => Ok(Transport::Unix),
            _ => Err(ConfigError::UnknownTransport(value.to_string())),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Unix => write!(f, "unix"),
        }
    }
}

/// Configuration for the client and its pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379" or "/run/kv.sock".
    pub addr: String,
    /// Stream kind for `addr`.
    #[serde(alias = "proto")]
    pub transport: Transport,
    /// Number of connection slots; zero leaves the client unusable.
    pub pool_size: usize,
    /// Connect timeout and per-call deadline.
    #[serde(rename = "timeout_ms", deserialize_with = "duration_from_millis")]
    pub timeout: Duration,
    /// Close the connection after a timed-out call instead of reusing it.
    pub discard_on_timeout: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            transport: Transport::Tcp,
            pool_size: DEFAULT_POOL_SIZE,
            timeout: DEFAULT_TIMEOUT,
            discard_on_timeout: false,
        }
    }
}

impl ClientConfig {
    /// Loads a configuration from environment variables.
    ///
    /// With prefix `"cache"` the variables are `CACHE_PROTO`, `CACHE_ADDR`,
    /// `CACHE_POOL_SIZE` and `CACHE_TIMEOUT_MS`. Unset variables keep their
    /// defaults; set but malformed ones are errors.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |name| env::var(name).ok())
    }

    fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = prefix.to_ascii_uppercase();
        let var = |suffix: &str| {
            let name = format!("{}_{}", prefix, suffix);
            lookup(&name).map(|value| (name, value))
        };

        let mut config = ClientConfig::default();
        if let Some((_, value)) = var("PROTO") {
            config.transport = value.parse()?;
        }
        if let Some((_, value)) = var("ADDR") {
            config.addr = value;
        }
        if let Some((name, value)) = var("POOL_SIZE") {
            let size = parse_number(&name, &value)?;
            config.pool_size = usize::try_from(size).map_err(|_| ConfigError::Invalid {
                var: name.clone(),
                value: value.clone(),
            })?;
        }
        if let Some((name, value)) = var("TIMEOUT_MS") {
            config.timeout = Duration::from_millis(parse_number(&name, &value)?);
        }
        Ok(config)
    }
}

fn parse_number(var: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
