//! Error types for the value system.

use thiserror::Error;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur when building or decoding values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// Session code is not exactly four ASCII digits.
    #[error("Invalid session code '{raw}': expected 4 digits")]
    InvalidSessionCode {
        raw: String,
    },

    /// Detection payload is outside the accepted ranges.
    ///
    /// Raised by [`crate::Detection::validate`]; consumers such as the
    /// clustering engine log it and skip the detection.
    #[error("Invalid detection '{label}': {reason}")]
    InvalidDetection {
        label: String,
        reason: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error (malformed or unrecognized payload).
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl ValueError {
    /// Build an [`ValueError::InvalidDetection`] for the given label.
    pub fn invalid_detection(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDetection {
            label: label.into(),
            reason: reason.into(),
        }
    }
}
