//! Clustering thresholds

use crate::error::{DeploymentError, DeploymentResult};
use serde::{Deserialize, Serialize};

/// Thresholds of the deployment clustering engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Detections older than this relative to the newest entry are ignored,
    /// and a cluster only accepts detections this close to its latest member (ms)
    pub time_window_ms: u64,

    /// Maximum distance between a detection and a cluster centroid (px)
    pub proximity_px: f64,

    /// Minimum detection confidence
    pub min_confidence: f64,

    /// Smallest cluster promoted to an event
    pub min_detections: usize,

    /// Largest cluster promoted to an event
    pub max_detections: usize,

    /// Age limit for [`crate::DeploymentTracker::recent`] (ms)
    pub recent_window_ms: u64,

    /// Window of [`liveview_values::DeploymentStats::per_minute`] (ms)
    pub rate_window_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            time_window_ms: 1000,
            proximity_px: 80.0,
            min_confidence: 0.4,
            min_detections: 2,
            max_detections: 15,
            recent_window_ms: 30_000,
            rate_window_ms: 60_000,
        }
    }
}

impl ClusterConfig {
    /// Validate thresholds
    pub fn validate(&self) -> DeploymentResult<()> {
        if self.time_window_ms == 0 {
            return Err(DeploymentError::Config("time_window_ms must be > 0".to_string()));
        }

        if !self.proximity_px.is_finite() || self.proximity_px <= 0.0 {
            return Err(DeploymentError::Config(format!(
                "proximity_px must be a positive number, got {}",
                self.proximity_px
            )));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(DeploymentError::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }

        if self.min_detections == 0 || self.min_detections > self.max_detections {
            return Err(DeploymentError::Config(format!(
                "detection bounds [{}, {}] are invalid",
                self.min_detections, self.max_detections
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.time_window_ms, 1000);
        assert_eq!(config.proximity_px, 80.0);
        assert_eq!(config.min_detections, 2);
        assert_eq!(config.max_detections, 15);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let config = ClusterConfig {
            min_detections: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_confidence_range() {
        let config = ClusterConfig {
            min_confidence: 1.5,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("min_confidence"));
    }
}
