//! Detection and inference-channel types.

use crate::error::{ValueError, ValueResult};
use crate::session::SessionCode;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl BoundingBox {
    /// Build a box from its corners, deriving width and height.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Center point `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One labeled box produced by the upstream detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Class name (e.g. "knight")
    #[serde(alias = "class_label", alias = "class_name")]
    pub class_label: String,

    /// Numeric class index
    #[serde(default, alias = "class_id")]
    pub class_id: i64,

    /// Detector confidence in `[0, 1]`
    pub confidence: f64,

    /// Location in the frame
    #[serde(alias = "bounding_box", alias = "bbox")]
    pub bounding_box: BoundingBox,
}

impl Detection {
    /// Create a detection with a box given by its corners.
    pub fn new(class_label: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            class_label: class_label.into(),
            class_id: 0,
            confidence,
            bounding_box: bbox,
        }
    }

    /// Check that confidence and geometry are usable.
    pub fn validate(&self) -> ValueResult<()> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValueError::invalid_detection(
                &self.class_label,
                format!("confidence {} outside [0, 1]", self.confidence),
            ));
        }

        let b = &self.bounding_box;
        if ![b.x1, b.y1, b.x2, b.y2].iter().all(|v| v.is_finite()) {
            return Err(ValueError::invalid_detection(
                &self.class_label,
                "non-finite bounding box coordinate",
            ));
        }
        if b.x2 < b.x1 || b.y2 < b.y1 {
            return Err(ValueError::invalid_detection(
                &self.class_label,
                "inverted bounding box",
            ));
        }

        Ok(())
    }
}

/// Dimensions of the frame the detector ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: u32,
    pub height: u32,
}

/// Result of one inference cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceFrame {
    /// Detections found in this frame (may be empty)
    #[serde(default)]
    pub detections: Vec<Detection>,

    /// Model inference time
    #[serde(
        default,
        alias = "inference_time_ms",
        alias = "inference_time",
        deserialize_with = "crate::time::non_negative"
    )]
    pub inference_time_ms: f64,

    /// Frame dimensions
    #[serde(default, alias = "image_shape")]
    pub image_shape: ImageShape,

    /// Encoded annotated frame, passed through untouched
    #[serde(default, alias = "annotated_image")]
    pub annotated_image: String,

    /// Producer timestamp (ms); frames are keyed by it
    #[serde(deserialize_with = "crate::time::millis")]
    pub timestamp: u64,

    /// Session the frame belongs to, when the producer includes it
    #[serde(default, alias = "session_code", skip_serializing_if = "Option::is_none")]
    pub session_code: Option<SessionCode>,
}

impl InferenceFrame {
    /// Whether the frame carries at least one detection.
    pub fn has_detections(&self) -> bool {
        !self.detections.is_empty()
    }

    /// Decode a frame returned by the REST endpoint.
    pub fn from_json(text: &str) -> ValueResult<Self> {
        serde_json::from_str(text).map_err(|e| ValueError::DeserializationError(e.to_string()))
    }
}

/// Inbound message on the inference push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InferenceMessage {
    /// A new inference result
    InferenceUpdate {
        data: InferenceFrame,
    },

    /// Keep-alive reply
    Pong,

    /// Inference is running but has no result yet
    NoData,

    /// Server-side failure
    Error {
        message: String,
    },
}

impl InferenceMessage {
    /// Decode an inbound text frame.
    pub fn from_wire(text: &str) -> ValueResult<Self> {
        serde_json::from_str(text).map_err(|e| ValueError::DeserializationError(e.to_string()))
    }
}

/// Outbound message on the inference push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InferenceRequest {
    /// Keep-alive
    Ping,
}

impl InferenceRequest {
    /// Encode for sending.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Ping => r#"{"type":"ping"}"#.to_string(),
        }
    }
}

/// Body of the inference toggle POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceToggle {
    pub enabled: bool,
}

/// Response of the inference toggle POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceToggleResponse {
    #[serde(alias = "inferenceEnabled")]
    pub inference_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knight(confidence: f64) -> Detection {
        Detection::new("knight", confidence, BoundingBox::from_corners(0.0, 0.0, 10.0, 20.0))
    }

    #[test]
    fn test_center() {
        let bbox = BoundingBox::from_corners(90.0, 80.0, 110.0, 120.0);
        assert_eq!(bbox.center(), (100.0, 100.0));
        assert_eq!(bbox.width, 20.0);
    }

    #[test]
    fn test_validate_confidence_range() {
        assert!(knight(0.0).validate().is_ok());
        assert!(knight(1.0).validate().is_ok());
        assert!(knight(1.2).validate().is_err());
        assert!(knight(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_validate_geometry() {
        let mut det = knight(0.5);
        det.bounding_box.x2 = -1.0;
        assert!(matches!(
            det.validate(),
            Err(ValueError::InvalidDetection { .. })
        ));

        det.bounding_box = BoundingBox::from_corners(0.0, 0.0, f64::INFINITY, 1.0);
        assert!(det.validate().is_err());
    }

    #[test]
    fn test_ping_request() {
        let value: serde_json::Value =
            serde_json::from_str(&InferenceRequest::Ping.to_wire()).unwrap();
        assert_eq!(value["type"], "ping");
    }
}
