//! Policy rules loaded from configuration.
//!
//! A policy file is a flat list of named limits:
//!
//! ```yaml
//! policies:
//!   - name: chat-msg
//!     max_tokens: 3
//!     unit: second
//!   - name: login
//!     max_tokens: 5
//!     unit: minute
//!     unit_count: 15
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};

/// A set of policies read from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Policies in declaration order
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// A single named policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Policy name, matched against the key prefix before the first `:`
    pub name: String,
    /// Tokens available per window
    pub max_tokens: u64,
    /// The time unit of the window
    pub unit: TimeUnit,
    /// How many units make up one window
    #[serde(default = "default_unit_count")]
    pub unit_count: u32,
}

fn default_unit_count() -> u32 {
    1
}

/// Time unit for policy windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl PolicyRule {
    /// The full window length of this rule.
    pub fn window(&self) -> Duration {
        self.unit.duration() * self.unit_count
    }
}

impl PolicyFile {
    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse policy file: {}", e)))
    }
}
