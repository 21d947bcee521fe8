//! Error types for the Scrappy DDNS service
//!
//! This module defines all error types used throughout the crate.
//!
//! The first four variants form the request-level taxonomy:
//!
//! | Variant      | Cause  | Request outcome            |
//! |--------------|--------|----------------------------|
//! | `NotFound`   | client | 404, no state change       |
//! | `BadRequest` | client | 400, no state change       |
//! | `Storage`    | server | 500, record left untouched |
//! | `Notify`     | server | logged only, request is OK |

use thiserror::Error;

/// Result type alias for Scrappy DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the Scrappy DDNS service
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown token
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed claimed address
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Address store read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Outbound alert failed or timed out
    #[error("Notification error: {0}")]
    Notify(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors outside the address store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from push provider APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a notification error
    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the error was caused by the client's request
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BadRequest(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::not_found("x").is_client_error());
        assert!(Error::bad_request("x").is_client_error());
        assert!(!Error::storage("x").is_client_error());
        assert!(!Error::notify("x").is_client_error());
    }

    #[test]
    fn test_provider_error_display() {
        let err = Error::provider("pushover", "invalid user key");
        assert_eq!(err.to_string(), "Provider error (pushover): invalid user key");
    }
}
