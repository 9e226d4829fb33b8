//! Detection history entries.

use crate::inference::{Detection, InferenceFrame};
use crate::session::SessionCode;
use serde::{Deserialize, Serialize};

/// A stored inference result with at least one detection.
///
/// Ids are derived from the session code and the producer timestamp, so they
/// sort in time order and the same frame always maps to the same id no matter
/// which transport delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique, time-ordered id
    pub id: String,

    /// Producer timestamp (ms)
    pub timestamp: u64,

    /// Detections, never empty
    pub detections: Vec<Detection>,

    /// Encoded annotated frame
    pub annotated_image: String,

    /// Model inference time
    pub inference_time_ms: f64,

    /// Session the entry belongs to
    pub session_code: SessionCode,
}

impl HistoryEntry {
    /// Id for the frame produced at `timestamp` in session `code`.
    pub fn entry_id(code: &SessionCode, timestamp: u64) -> String {
        format!("{}-{:013}", code, timestamp)
    }

    /// Build an entry from a frame. Frames without detections are not
    /// events and yield `None`.
    pub fn from_frame(code: &SessionCode, frame: &InferenceFrame) -> Option<Self> {
        if !frame.has_detections() {
            return None;
        }

        Some(Self {
            id: Self::entry_id(code, frame.timestamp),
            timestamp: frame.timestamp,
            detections: frame.detections.clone(),
            annotated_image: frame.annotated_image.clone(),
            inference_time_ms: frame.inference_time_ms,
            session_code: code.clone(),
        })
    }

    /// Stable id of the `index`-th detection in this entry.
    pub fn detection_id(&self, index: usize) -> String {
        format!("{}#{}", self.id, index)
    }
}
