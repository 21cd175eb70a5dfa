//! Error types for the pool server
//!
//! This module provides the error handling system using `thiserror`
//! for automatic error trait implementations.

use thiserror::Error;

/// Main error type for the pool server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP errors talking to the node owner API
    #[error("Node API error: {0}")]
    NodeApi(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream node connection errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Stratum protocol errors
    #[error("Stratum error: {0}")]
    Stratum(String),

    /// Share validation errors
    #[error("Invalid share: {0}")]
    InvalidShare(String),

    /// Share-log producer errors
    #[error("Producer error: {0}")]
    Producer(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for the pool server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an upstream node error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a stratum error
    pub fn stratum(msg: impl Into<String>) -> Self {
        Self::Stratum(msg.into())
    }

    /// Create an invalid share error
    pub fn invalid_share(msg: impl Into<String>) -> Self {
        Self::InvalidShare(msg.into())
    }

    /// Create a producer error
    pub fn producer(msg: impl Into<String>) -> Self {
        Self::Producer(msg.into())
    }

    /// Create a channel send error
    pub fn channel_send(msg: impl Into<String>) -> Self {
        Self::ChannelSend(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<kafka::Error> for Error {
    fn from(err: kafka::Error) -> Self {
        Self::Producer(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing field");
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = Error::invalid_share("duplicate nonce");
        assert_eq!(err.to_string(), "Invalid share: duplicate nonce");
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
