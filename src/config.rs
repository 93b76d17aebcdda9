//! Configuration management for Ratekeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};
use crate::ratelimit::{PolicyRule, RateLimiterOptions};

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Policies declared inline
    #[serde(default)]
    pub policies: Vec<PolicyRule>,

    /// Path to a separate policy file, applied after the inline policies
    #[serde(default)]
    pub policies_path: Option<String>,
}

/// Background sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Interval between sweeps of expired buckets, in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON formatted log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading service configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse service config: {}", e)))
    }

    /// Limiter options derived from this configuration.
    pub fn limiter_options(&self) -> RateLimiterOptions {
        RateLimiterOptions {
            sweep_interval: Duration::from_millis(self.sweeper.interval_ms),
        }
    }
}
