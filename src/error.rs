//! Error types for Ratekeeper.
//!
//! Only configuration problems surface as errors. Denied consumption is an
//! ordinary `false`, never an `Err`.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// A policy was configured with an unusable capacity, window or name
    #[error("Invalid limit '{name}': {reason}")]
    InvalidLimit { name: String, reason: String },

    /// A key could not be built from the supplied identifiers
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Configuration or policy file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background work could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
