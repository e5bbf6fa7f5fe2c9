//! Error types for the Turnstile core.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The channel registry or another required collaborator is unreachable.
    ///
    /// The gate treats this as fail-closed: the interaction is denied with a
    /// generic error rather than let through unchecked.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
