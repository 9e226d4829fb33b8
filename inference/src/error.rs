//! Error types for inference synchronization

use liveview_common::DuplexError;
use liveview_values::ValueError;
use thiserror::Error;

/// Result type for inference operations
pub type InferenceResult<T> = Result<T, InferenceError>;

/// Errors raised while synchronizing inference results
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// No transport can deliver frames any more
    #[error("Synchronization error: {0}")]
    Synchronization(String),

    /// HTTP request failed
    #[error("HTTP error{}: {message}", status_suffix(.status))]
    Http { status: Option<u16>, message: String },

    /// The server does not offer inference polling (HTTP 501)
    #[error("Inference polling is not supported by the server")]
    Unsupported,

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Push channel failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<DuplexError> for InferenceError {
    fn from(err: DuplexError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ValueError> for InferenceError {
    fn from(err: ValueError) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = InferenceError::Http { status: Some(503), message: "unavailable".into() };
        assert_eq!(err.to_string(), "HTTP error (503): unavailable");
        assert_eq!(
            InferenceError::Synchronization("push exhausted".into()).to_string(),
            "Synchronization error: push exhausted"
        );
    }

    #[test]
    fn test_from_value_error() {
        let err: InferenceError = ValueError::DeserializationError("eof".into()).into();
        assert!(matches!(err, InferenceError::Decode(_)));
    }
}
