//! Error types for the alert gateway
//!
//! This module defines all error types used throughout the crate.
//!
//! Malformed device frames are never errors: the wire parser answers `None`
//! for them. Everything below is an operational failure that callers log or
//! propagate.

use thiserror::Error;

/// Result type alias for alert gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the alert gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Registry store errors (recipient set / device names)
    #[error("Registry store error: {0}")]
    Registry(String),

    /// Messaging gateway errors
    #[error("Messaging gateway error: {0}")]
    Gateway(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-related errors (bind failures, socket errors)
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from gateway bridges)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors (gateway session logged out)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Gateway is not connected
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Gateway-specific error
    #[error("Gateway error ({gateway}): {message}")]
    Provider {
        /// Gateway name
        gateway: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a registry store error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a messaging gateway error
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a "not connected" error
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a gateway-specific error
    pub fn provider(gateway: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            gateway: gateway.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the gateway session was logged out
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
