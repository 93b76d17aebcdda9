//! Named limit policies.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};

/// Capacity and window of a named policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Tokens available per window
    pub max_tokens: u64,
    /// Length of one fixed window
    pub window: Duration,
}

/// Holds the configured policies by name.
///
/// Writes are rare compared to lookups, so a single `RwLock` guards the map.
/// Replacing a policy is last-writer-wins and visible to the next lookup.
#[derive(Debug, Default)]
pub struct LimitRegistry {
    limits: RwLock<HashMap<String, LimitConfig>>,
}

impl LimitRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the policy called `name`.
    ///
    /// Rejects a zero capacity or a zero window; nothing is clamped. A name
    /// containing `:` is accepted but can never match a key.
    pub fn configure(&self, name: &str, max_tokens: u64, window: Duration) -> Result<()> {
        if max_tokens == 0 {
            return Err(invalid(name, "max_tokens must be greater than zero"));
        }
        if window.is_zero() {
            return Err(invalid(name, "window must be greater than zero"));
        }

        let config = LimitConfig { max_tokens, window };
        let previous = self.limits.write().insert(name.to_string(), config);

        info!(
            policy = %name,
            max_tokens = max_tokens,
            window = ?window,
            replaced = previous.is_some(),
            "Configured rate limit policy"
        );

        Ok(())
    }

    /// Look up the policy called `name`.
    pub fn lookup(&self, name: &str) -> Option<LimitConfig> {
        self.limits.read().get(name).copied()
    }

    /// Number of configured policies.
    pub fn len(&self) -> usize {
        self.limits.read().len()
    }

    /// Whether no policy is configured.
    pub fn is_empty(&self) -> bool {
        self.limits.read().is_empty()
    }
}

fn invalid(name: &str, reason: &str) -> RatekeeperError {
    RatekeeperError::InvalidLimit {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_configure_and_lookup() {
        let registry = LimitRegistry::new();
        assert_ok!(registry.configure("api", 5, Duration::from_secs(1)));

        let config = registry.lookup("api").unwrap();
        assert_eq!(config.max_tokens, 5);
        assert_eq!(config.window, Duration::from_secs(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = LimitRegistry::new();
        assert!(registry.lookup("unknown").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reconfigure_replaces() {
        let registry = LimitRegistry::new();
        assert_ok!(registry.configure("api", 5, Duration::from_secs(1)));
        assert_ok!(registry.configure("api", 50, Duration::from_secs(60)));

        let config = registry.lookup("api").unwrap();
        assert_eq!(config.max_tokens, 50);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejects_zero_tokens() {
        let registry = LimitRegistry::new();
        let err = assert_err!(registry.configure("api", 0, Duration::from_secs(1)));
        assert!(matches!(err, RatekeeperError::InvalidLimit { ref name, .. } if name == "api"));
        assert!(registry.lookup("api").is_none());
    }

    #[test]
    fn test_rejects_zero_window() {
        let registry = LimitRegistry::new();
        assert_err!(registry.configure("api", 5, Duration::ZERO));
        assert!(registry.lookup("api").is_none());
    }

    #[test]
    fn test_rejected_update_keeps_previous() {
        let registry = LimitRegistry::new();
        assert_ok!(registry.configure("api", 5, Duration::from_secs(1)));
        assert_err!(registry.configure("api", 0, Duration::from_secs(1)));

        assert_eq!(registry.lookup("api").unwrap().max_tokens, 5);
    }
}
