//! LiveView Inference Crate
//!
//! Keeps the inference results of a live session in step with the viewer.
//!
//! # Architecture
//!
//! - [`InferenceSynchronizer`]: push channel first, HTTP polling as fallback,
//!   exactly-once delivery into the history and statistics
//! - [`HistoryStore`]: bounded, most-recent-first detection history
//! - [`PerformanceTracker`]: rolling inference-time, rate and accuracy figures
//! - [`FrameSource`] / [`InferenceSwitch`]: HTTP seams for polling and for
//!   turning inference on
//! - [`backoff_delay`] / [`Reconnect`]: push reconnection policy
//!
//! # Usage
//!
//! ```rust,no_run
//! use liveview_inference::{InferenceConfig, InferenceSynchronizer};
//! use liveview_values::SessionCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sync = InferenceSynchronizer::from_config(InferenceConfig::from_env())?;
//!
//!     sync.enable_and_start(SessionCode::parse("4821")?).await?;
//!     let mut history = sync.history().subscribe();
//!     history.changed().await?;
//!
//!     println!("latest: {:?}", sync.history().latest());
//!     println!("stats: {:?}", sync.performance());
//!     sync.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod backoff;
mod config;
mod error;
mod history;
mod poll;
mod push;
mod stats;
mod synchronizer;
mod toggle;

// Re-exports
pub use backoff::{backoff_delay, Reconnect, BACKOFF_BASE_MS, BACKOFF_CAP_MS};
pub use config::InferenceConfig;
pub use error::{InferenceError, InferenceResult};
pub use history::HistoryStore;
pub use poll::{FrameSource, HttpFrameSource};
pub use stats::{PerformanceTracker, DETECTION_RATE_WINDOW_MS, FPS_WINDOW_MS};
pub use synchronizer::{InferenceSynchronizer, SyncBackends, SyncEvent, SyncState};
pub use toggle::{HttpInferenceSwitch, InferenceSwitch};
