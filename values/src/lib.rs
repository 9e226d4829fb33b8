//! # LiveView Values
//!
//! Value types shared by every LiveView crate: the session code that keys a
//! viewing session, the signaling and inference wire messages, detections and
//! history entries, latency/performance figures and deployment events.
//!
//! ## Wire format
//!
//! All messages are JSON objects tagged by a snake_case `type` field with
//! camelCase payload fields:
//!
//! ```text
//! {"type":"offer","sdp":"v=0...","targetViewerId":"v-17"}
//! {"type":"inference_update","data":{"detections":[...],"timestamp":1712}}
//! ```
//!
//! Decoding happens once, at the channel boundary, through
//! [`SignalingMessage::from_wire`] and [`InferenceMessage::from_wire`]. Anything
//! that does not decode is rejected with a [`ValueError`] and never reaches the
//! rest of the system.
//!
//! ## Usage Example
//!
//! ```rust
//! use liveview_values::{SessionCode, SignalingMessage, Role};
//!
//! let code = SessionCode::parse("4821").unwrap();
//! let hello = SignalingMessage::Connect { role: Role::Viewer, code: code.clone() };
//! let wire = hello.to_wire(&code, 1_000).unwrap();
//! assert!(wire.contains("\"clientTs\":1000"));
//! ```

pub mod deployment;
pub mod error;
pub mod history;
pub mod inference;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod time;

// Re-exports for convenience
pub use deployment::{DeploymentEvent, DeploymentStats};
pub use error::{ValueError, ValueResult};
pub use history::HistoryEntry;
pub use inference::{
    BoundingBox, Detection, ImageShape, InferenceFrame, InferenceMessage, InferenceRequest,
    InferenceToggle, InferenceToggleResponse,
};
pub use session::{ConnectionError, ConnectionStatus, SessionCode, SESSION_CODE_LEN};
pub use signaling::{IceCandidateInit, OfferRequest, OfferResponse, Role, SdpType, SignalingMessage};
pub use stats::{LatencyReport, LatencySample, PerformanceStats, TransportKind};
