//! Session identity and connection status.

use crate::error::{ValueError, ValueResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of digits in a session code.
pub const SESSION_CODE_LEN: usize = 4;

/// Short numeric code correlating a broadcaster with its viewers.
///
/// A code is exactly [`SESSION_CODE_LEN`] ASCII digits and never changes for
/// the lifetime of a session. It keys the signaling channel, the inference
/// channel and every history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Parse a session code, trimming surrounding whitespace.
    pub fn parse(raw: &str) -> ValueResult<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == SESSION_CODE_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ValueError::InvalidSessionCode {
                raw: raw.to_string(),
            })
        }
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

/// Media session connection status.
///
/// ```text
/// Idle → Connecting → Live → Disconnected → Reconnecting → Live ...
///            └──────────┴──────────┴─────────→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Nothing open; initial state and the state after `disconnect()`
    Idle,

    /// Signaling open, waiting for an offer or for ICE connectivity
    Connecting,

    /// Media transport reports connected or completed
    Live,

    /// Caller re-initiated a session after a disconnect
    Reconnecting,

    /// Transport or broadcaster went away; signaling may still be open
    Disconnected,

    /// Unrecoverable failure (signaling rejected or could not open)
    Failed,
}

impl ConnectionStatus {
    /// Convert status to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }

    /// Whether a media negotiation is still in progress.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Whether a fresh `connect()` should be reported as a reconnect.
    pub fn is_after_loss(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error value pushed to the caller.
///
/// This is what a UI renders in its disconnect/error banner. Failures never
/// cross the public API as panics; they arrive as one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionError {
    /// Human-readable explanation
    pub message: String,

    /// Machine-readable category (e.g. `signaling_error`, `transport_failed`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// When the error was observed
    pub timestamp: DateTime<Utc>,
}

impl ConnectionError {
    /// Create an error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            timestamp: Utc::now(),
        }
    }

    /// Create an error with a category code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}
