//! Error types for WebRTC operations
//!
//! Every variant maps onto a [`ConnectionError`] category so failures reach
//! the caller as structured values through the session's error channel.

use liveview_common::DuplexError;
use liveview_values::ConnectionError;
use thiserror::Error;

/// Result type for WebRTC operations
pub type WebRtcResult<T> = Result<T, WebRtcError>;

/// Errors that can occur while establishing or running a media session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebRtcError {
    /// Signaling channel could not be opened or was lost
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Offer/answer exchange failed
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Peer transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP offer exchange failed
    #[error("HTTP error{}: {message}", status_suffix(.status))]
    Http { status: Option<u16>, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl WebRtcError {
    /// Machine-readable category
    pub fn code(&self) -> &'static str {
        match self {
            Self::Signaling(_) => "signaling_error",
            Self::Negotiation(_) => "negotiation_error",
            Self::Transport(_) => "transport_error",
            Self::Http { .. } => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Convert to the structured error value pushed to callers
    pub fn to_connection_error(&self) -> ConnectionError {
        ConnectionError::with_code(self.to_string(), self.code())
    }
}

impl From<DuplexError> for WebRtcError {
    fn from(err: DuplexError) -> Self {
        Self::Signaling(err.to_string())
    }
}

impl From<reqwest::Error> for WebRtcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_mapping() {
        let err = WebRtcError::Negotiation("bad sdp".to_string());
        let value = err.to_connection_error();

        assert_eq!(value.code.as_deref(), Some("negotiation_error"));
        assert_eq!(value.message, "Negotiation error: bad sdp");
    }

    #[test]
    fn test_http_display() {
        let with_status = WebRtcError::Http { status: Some(502), message: "bad gateway".into() };
        let without = WebRtcError::Http { status: None, message: "timed out".into() };

        assert_eq!(with_status.to_string(), "HTTP error (502): bad gateway");
        assert_eq!(without.to_string(), "HTTP error: timed out");
    }

    #[test]
    fn test_from_duplex_error() {
        let err: WebRtcError = DuplexError::Connect {
            url: "ws://x/4821".into(),
            reason: "refused".into(),
        }
        .into();
        assert_eq!(err.code(), "signaling_error");
    }
}
