//! Error types for askdb-ai

use thiserror::Error;

/// Result type alias using askdb-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised before or while opening a completion stream.
///
/// Failures after the stream is open arrive as `MessageEvent::Error` text.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Sse(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_errors_are_retryable() {
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::InvalidConfig("no base url".into()).is_retryable());
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!Error::from(json).is_retryable());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::InvalidConfig("model base_url is empty".into()).to_string(),
            "Invalid configuration: model base_url is empty"
        );
    }
}
