//! Bucket key construction and parsing.
//!
//! Keys have the shape `<policy>:<scope>:<identifier>` or `<policy>:global`.
//! The engine only reads the policy prefix; everything after the first `:`
//! is opaque to it.

use crate::error::{RatekeeperError, Result};

/// Builds bucket keys for the common subject scopes.
///
/// Identifiers are validated here, before a key reaches the limiter, because
/// the limiter itself only checks for a `:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyBuilder;

impl KeyBuilder {
    /// Key for a per-user limit.
    pub fn per_user(policy: &str, user_id: &str) -> Result<String> {
        require("policy", policy)?;
        require("user id", user_id)?;
        Ok(format!("{}:user:{}", policy, user_id))
    }

    /// Key for a per-client-address limit.
    pub fn per_ip(policy: &str, ip: &str) -> Result<String> {
        require("policy", policy)?;
        require("ip address", ip)?;
        Ok(format!("{}:ip:{}", policy, ip))
    }

    /// Key for a limit shared by every caller.
    pub fn global(policy: &str) -> Result<String> {
        require("policy", policy)?;
        Ok(format!("{}:global", policy))
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RatekeeperError::InvalidKey(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Extract the policy name from a key.
///
/// Returns the text before the first `:`, or `None` when the key has no `:`.
pub fn parse_policy(key: &str) -> Option<&str> {
    key.split_once(':').map(|(policy, _)| policy)
}
