//! Error types for deployment clustering

use thiserror::Error;

/// Result type for clustering operations
pub type DeploymentResult<T> = Result<T, DeploymentError>;

/// Errors raised by the clustering engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeploymentError {
    /// Invalid clustering thresholds
    #[error("Configuration error: {0}")]
    Config(String),
}
