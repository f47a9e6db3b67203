//! Error types for Scribe

use thiserror::Error;

/// Main error type for Scribe operations
#[derive(Error, Debug)]
pub enum ScribeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream API errors (connection-level failures)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Ephemeral queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Durable store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Capture pipeline errors
    #[error("Capture error: {0}")]
    Capture(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for Scribe operations
pub type Result<T> = std::result::Result<T, ScribeError>;
