//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup, fails fast if required settings are missing or
//! malformed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::storage::{DEFAULT_BUSY_TIMEOUT, JournalMode, StoreOptions};
use crate::sweeper::SweepPolicy;

const DEFAULT_STALE_AFTER_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the SQLite store file.
    pub database: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// Seconds between periodic recovery sweeps. None disables the sweeper.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
    /// Age in seconds after which an unacknowledged delivery is requeued.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_database(None)
    }

    /// Like [`Config::from_env`], but a `database` given here replaces
    /// `ACKQ_DATABASE`, which is then not required.
    pub fn from_env_with_database(database: Option<PathBuf>) -> Result<Self> {
        let database = match database {
            Some(path) => path,
            None => PathBuf::from(required_var("ACKQ_DATABASE")?),
        };
        let config = Self {
            database,
            busy_timeout_ms: parsed_var("ACKQ_BUSY_TIMEOUT_MS")?
                .unwrap_or_else(default_busy_timeout_ms),
            journal_mode: match std::env::var("ACKQ_JOURNAL_MODE").ok().as_deref() {
                None | Some("wal") => JournalMode::Wal,
                Some("delete") => JournalMode::Delete,
                Some(other) => {
                    return Err(Error::Config(format!(
                        "ACKQ_JOURNAL_MODE must be wal or delete, got {other:?}"
                    )));
                }
            },
            sweep_interval_secs: parsed_var("ACKQ_SWEEP_INTERVAL_SECS")?,
            stale_after_secs: parsed_var("ACKQ_STALE_AFTER_SECS")?
                .unwrap_or(DEFAULT_STALE_AFTER_SECS),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == Some(0) {
            return Err(Error::Config(
                "sweep interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            journal_mode: self.journal_mode,
        }
    }

    /// Periodic recovery policy, if a sweep interval is configured.
    pub fn sweep_policy(&self) -> Option<SweepPolicy> {
        self.sweep_interval_secs.map(|secs| SweepPolicy {
            interval: Duration::from_secs(secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is not a number: {e}"))),
        Err(_) => Ok(None),
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}
