//! Error types for the rate limiter.

use thiserror::Error;

/// Main error type for rate limiter operations.
#[derive(Error, Debug)]
pub enum TurnpikeError {
    /// Configuration errors. Fatal at startup: the middleware must never
    /// run with a half-configured storage backend.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage adapter errors. Always surfaced to the caller, never retried
    /// or swallowed by the decision engine.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for TurnpikeError {
    fn from(err: redis::RedisError) -> Self {
        TurnpikeError::Storage(err.to_string())
    }
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, TurnpikeError>;
