use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`WorkerConfig::output_rate`], in milliseconds.
pub const OUTPUT_RATE_VAR: &str = "INTERLUDE_OUTPUT_RATE_MS";
/// Environment variable overriding [`WorkerConfig::timeout`], in seconds; `0` disables it.
pub const TIMEOUT_VAR: &str = "INTERLUDE_TIMEOUT_SECS";

/// Settings of the worker and of the master handle that supervises it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Window within which consecutive writes are batched into one `print` message.
    pub output_rate: Duration,
    /// Longest a single command may run before the worker is torn down.
    pub timeout: Option<Duration>,
    /// Capacity of the host command channel.
    pub channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            output_rate: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(20)),
            channel_capacity: 32,
        }
    }
}

impl WorkerConfig {
    /// Defaults overridden by `INTERLUDE_OUTPUT_RATE_MS` and `INTERLUDE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(millis) = parse_var(&lookup, OUTPUT_RATE_VAR)? {
            config.output_rate = Duration::from_millis(millis);
        }
        if let Some(secs) = parse_var(&lookup, TIMEOUT_VAR)? {
            config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(config)
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber { name, value })
}

/// A configuration variable could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer, got {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
