// ⚙️ Runtime configuration
// Read from POLICY_GATE_* environment variables, defaults otherwise.

use crate::converter::DEFAULT_PRICE_URL;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB: &str = "POLICY_GATE_DB";
pub const ENV_ADDR: &str = "POLICY_GATE_ADDR";
pub const ENV_PRICE_URL: &str = "POLICY_GATE_PRICE_URL";
pub const ENV_PRICE_TIMEOUT: &str = "POLICY_GATE_PRICE_TIMEOUT_SECS";
pub const ENV_LOG_FORMAT: &str = "POLICY_GATE_LOG_FORMAT";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for development
    #[default]
    Pretty,
    /// Single line per event
    Compact,
    /// Structured, for log aggregation
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Server bind address
    pub bind_addr: String,

    /// Price-quote endpoint
    pub price_url: String,

    /// Upper bound on a single price lookup
    pub price_timeout_secs: u64,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("policy_gate.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            price_url: DEFAULT_PRICE_URL.to_string(),
            price_timeout_secs: 10,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using any key lookup (lets tests avoid touching the real environment)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup(ENV_DB) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_ADDR) {
            config.bind_addr = addr;
        }
        if let Some(url) = lookup(ENV_PRICE_URL) {
            config.price_url = url;
        }
        if let Some(raw) = lookup(ENV_PRICE_TIMEOUT) {
            config.price_timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got {:?}", ENV_PRICE_TIMEOUT, raw))?;
            if config.price_timeout_secs == 0 {
                bail!("{} must be at least 1 second", ENV_PRICE_TIMEOUT);
            }
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log_format = LogFormat::parse(&raw).with_context(|| {
                format!("{} must be pretty, compact or json, got {:?}", ENV_LOG_FORMAT, raw)
            })?;
        }

        Ok(config)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_secs(self.price_timeout_secs)
    }
}
