//! Type definitions for media transport events

use liveview_values::IceCandidateInit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// ICE connectivity state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceState {
    /// Media can flow
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    /// Connectivity was lost
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Kind of an inbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Read-only descriptor of an inbound media track
///
/// Handed to consumers as `Arc<InboundStream>`; the session keeps ownership
/// of the underlying track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundStream {
    /// Track ID
    pub track_id: String,

    /// Media stream ID the track belongs to
    pub stream_id: String,

    /// Audio or video
    pub kind: MediaKind,

    /// Negotiated codec MIME type
    pub codec: String,
}

/// Cumulative transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames received across inbound video tracks
    pub frames_received: u64,

    /// Frames decoded across inbound video tracks
    pub frames_decoded: u64,

    /// When the last media packet arrived (ms)
    pub last_packet_received_ms: Option<u64>,
}

impl TransportStats {
    /// Frame counter used for advancement checks
    pub fn frames(&self) -> u64 {
        self.frames_received.max(self.frames_decoded)
    }
}

/// Event emitted by a media transport
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// ICE connectivity changed
    IceConnectionState(IceState),

    /// Local ICE candidate to trickle to the remote peer
    LocalCandidate(IceCandidateInit),

    /// Remote track arrived
    TrackArrived(Arc<InboundStream>),
}

/// Sending half of a transport's event stream
///
/// Events are tagged with the generation of the transport that produced them
/// so the session can ignore stragglers from a transport it already replaced.
#[derive(Debug, Clone)]
pub struct MediaEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, MediaEvent)>,
}

impl MediaEventSender {
    /// Create a sender for one transport generation
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, MediaEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sender is bound to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event. Returns `false` once the session stopped listening.
    pub fn send(&self, event: MediaEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}
