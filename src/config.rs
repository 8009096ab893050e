//! Configuration management for the log shell.
//!
//! Handles loading engine settings from a TOML file and environment variables.
//! Every field has a default, so an absent or empty file yields a usable config.

use crate::backend::DatabaseContext;
use crate::error::{Result, ShellError};
use crate::query::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the poll interval.
pub const ENV_POLL_INTERVAL_MS: &str = "LOG_SHELL_POLL_INTERVAL_MS";

/// Environment variable overriding the default database.
pub const ENV_DATABASE: &str = "LOG_SHELL_DATABASE";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Delay between two status checks of a running query.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How many times a failed status check is retried before giving up.
    #[serde(default = "default_max_poll_retries")]
    pub max_poll_retries: u32,

    /// First backoff delay after a failed status check.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor applied to the backoff after each failure.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Rows requested per results page. `None` lets the backend decide.
    #[serde(default)]
    pub page_size: Option<u32>,

    /// Database the shell targets until another one is selected.
    #[serde(default)]
    pub database: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_max_poll_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_retries: default_max_poll_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            page_size: None,
            database: None,
        }
    }
}

impl ShellConfig {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("log-shell")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ShellError::config(format!("Failed to read config file: {e}")))?;

        let config = Self::parse_toml(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path` with the `LOG_SHELL_*` environment
    /// variables applied on top.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ShellError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Checks that the values describe a loop that terminates and makes progress.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ShellError::config(
                "poll_interval_ms must be greater than zero",
            ));
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(ShellError::config(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ShellError::config(
                "max_backoff_ms must not be smaller than initial_backoff_ms",
            ));
        }
        if self.page_size == Some(0) {
            return Err(ShellError::config("page_size must be greater than zero"));
        }
        Ok(())
    }

    /// Applies `LOG_SHELL_*` environment variables on top of the file values.
    ///
    /// A zero or unparsable poll interval is ignored. The database variable
    /// only fills in a database the file left unset.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var(ENV_POLL_INTERVAL_MS) {
            if let Ok(ms) = interval.parse::<u64>() {
                if ms > 0 {
                    self.poll_interval_ms = ms;
                }
            }
        }
        if self.database.is_none() {
            self.database = std::env::var(ENV_DATABASE).ok().filter(|d| !d.is_empty());
        }
    }

    /// Delay between two status checks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry policy for transient status-check failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_poll_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    /// Database context used for new submissions.
    pub fn database_context(&self) -> DatabaseContext {
        DatabaseContext {
            database: self.database.clone(),
        }
    }
}
