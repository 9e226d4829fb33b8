//! LiveView viewer
//!
//! Headless controller that joins a broadcast by session code and keeps the
//! viewer-side subsystems in step:
//! - media session (`liveview-webrtc`)
//! - inference synchronization (`liveview-inference`)
//! - deployment detection (`liveview-deployments`)
//!
//! The `liveview` binary wires these from CLI arguments, environment and a
//! TOML file; see [`ViewerConfig::load`].

pub mod app;
pub mod config;
pub mod error;

pub use app::{LiveViewer, StatusReport};
pub use config::{CliArgs, ConnectMode, EndpointConfig, LoggingConfig, ViewerConfig};
pub use error::{ViewerError, ViewerResult};
