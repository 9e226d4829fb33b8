//! LiveView Deployments Crate
//!
//! Groups detections that appear close together in space and time into
//! discrete deployment events (a troop placed on the field shows up as a
//! short burst of detections around one spot).
//!
//! - [`DeploymentTracker`]: feeds on history snapshots, emits each
//!   deployment once it has settled and summarizes them
//! - [`cluster()`]: the underlying greedy clustering pass
//! - [`ClusterConfig`]: window, proximity, confidence and size thresholds
//!
//! # Usage
//!
//! ```rust
//! use liveview_deployments::{ClusterConfig, DeploymentTracker};
//!
//! let mut tracker = DeploymentTracker::new(ClusterConfig::default());
//! let events = tracker.ingest(&[], 0);
//! assert!(events.is_empty());
//! assert_eq!(tracker.stats(0).total, 0);
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod cluster;
mod config;
mod error;
mod tracker;

pub use cluster::{cluster, Candidate, Cluster};
pub use config::ClusterConfig;
pub use error::{DeploymentError, DeploymentResult};
pub use tracker::DeploymentTracker;
