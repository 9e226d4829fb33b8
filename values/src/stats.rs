//! Latency and performance figures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One end-to-end latency measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySample {
    /// Sequence number of the measured frame batch
    pub frame_id: u64,

    /// Estimated capture time (ms)
    pub capture_ts: u64,

    /// Time the frame was observed on the viewer (ms)
    pub display_ts: u64,

    /// `display_ts - capture_ts`
    pub end_to_end_ms: f64,

    /// Signaling round-trip at the time of the sample
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signaling_ms: Option<f64>,

    /// One-way network estimate at the time of the sample
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_ms: Option<f64>,
}

/// Latency figures exposed to callers.
///
/// The rolling aggregate, the network probe estimate and the signaling
/// round-trip measure different legs and are reported side by side, never
/// combined.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    /// Most recent end-to-end sample
    pub current: f64,

    /// Mean over the rolling window
    pub average: f64,

    /// Minimum over the rolling window
    pub min: f64,

    /// Maximum over the rolling window
    pub max: f64,

    /// Samples in the rolling window
    pub sample_count: usize,

    /// Latest one-way network estimate from probes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_ms: Option<f64>,

    /// Signaling round-trip reported at connection time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signaling_ms: Option<f64>,
}

/// Which transport delivers inference frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// No transport has delivered anything yet
    None,

    /// Duplex push channel
    Push,

    /// HTTP polling fallback
    Poll,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Push => "push",
            Self::Poll => "poll",
        })
    }
}

/// Rolling inference performance statistics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    /// Mean inference time over the rolling buffer
    pub avg_inference_time_ms: f64,

    /// Detections per second over the last 5 s
    pub detections_per_second: f64,

    /// Detections received since activation
    pub total_detections: u64,

    /// Percentage of frames with at least one detection, since activation
    pub accuracy_pct: f64,

    /// Frames per second over the last 10 s
    pub inference_fps: f64,

    /// Push connection attempts made
    pub connection_attempts: u32,

    /// Transport that delivered the latest frame
    pub transport_kind: TransportKind,
}
