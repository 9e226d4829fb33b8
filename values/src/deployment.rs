//! Deployment events recovered from detection bursts.

use serde::{Deserialize, Serialize};

/// A clustered burst of detections interpreted as one troop placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    /// Unique event id
    pub id: String,

    /// Timestamp of the first member detection (ms)
    #[serde(rename = "timestampOfFirstDetection")]
    pub timestamp: u64,

    /// Mean of member box centers
    pub center_x: f64,
    pub center_y: f64,

    /// Unique class labels, in order of first appearance
    pub troop_types: Vec<String>,

    /// Number of member detections
    pub detection_count: usize,

    /// Last member timestamp minus first
    pub duration_ms: u64,

    /// Mean member confidence
    pub confidence: f64,
}

/// Summary over emitted deployment events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStats {
    /// Events emitted since the last clear
    pub total: usize,

    /// Events in the last 60 s
    pub per_minute: usize,

    /// Mean event duration
    pub average_duration_ms: f64,

    /// Most frequent troop type, ties broken by first appearance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_common_troop: Option<String>,
}
