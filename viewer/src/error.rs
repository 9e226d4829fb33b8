//! Error types for the viewer controller.

use liveview_inference::InferenceError;
use liveview_webrtc::WebRtcError;
use std::time::Duration;
use thiserror::Error;

/// Result type for viewer operations.
pub type ViewerResult<T> = Result<T, ViewerError>;

#[derive(Error, Debug)]
pub enum ViewerError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Media session could not be established
    #[error(transparent)]
    Session(#[from] WebRtcError),

    /// Media session reached `Failed`
    #[error("Session failed: {0}")]
    SessionFailed(String),

    /// Stream did not go live in time
    #[error("Stream did not go live within {0:?}")]
    ConnectTimeout(Duration),

    /// Inference synchronization could not start
    #[error(transparent)]
    Inference(#[from] InferenceError),
}
