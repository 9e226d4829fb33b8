//! Signaling wire messages.
//!
//! One tagged union covers both directions of the signaling channel. Inbound
//! text frames are decoded with [`SignalingMessage::from_wire`]; outbound
//! messages are encoded with [`SignalingMessage::to_wire`], which stamps every
//! frame with the session code and a client timestamp so the server can
//! correlate it.

use crate::error::{ValueError, ValueResult};
use crate::session::SessionCode;
use serde::{Deserialize, Serialize};

/// Which side of a session a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Receives media
    Viewer,

    /// Publishes media
    Broadcaster,
}

/// ICE candidate as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    /// Candidate string (SDP attribute format)
    pub candidate: String,

    /// SDP media line index
    #[serde(rename = "sdpMLineIndex", default, alias = "sdp_mline_index")]
    pub sdp_mline_index: Option<u16>,

    /// SDP media stream ID
    #[serde(rename = "sdpMid", default, alias = "sdp_mid")]
    pub sdp_mid: Option<String>,
}

/// Signaling channel message (both directions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SignalingMessage {
    /// Announce this peer for a session
    Connect {
        role: Role,
        code: SessionCode,
    },

    /// Server accepted the peer
    Connected {
        connection_id: String,
        #[serde(default)]
        viewer_count: u32,
        #[serde(default)]
        max_viewers: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signaling_latency_ms: Option<f64>,
    },

    /// SDP offer from the broadcaster
    Offer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_viewer_id: Option<String>,
    },

    /// SDP answer from the viewer
    Answer {
        sdp: String,
    },

    /// Trickled ICE candidate
    IceCandidate(IceCandidateInit),

    /// Keep-alive
    Ping {
        #[serde(deserialize_with = "crate::time::millis")]
        ts: u64,
    },

    /// Keep-alive reply
    Pong {
        #[serde(deserialize_with = "crate::time::millis")]
        ts: u64,
    },

    /// Explicit network timing probe
    LatencyProbe {
        #[serde(deserialize_with = "crate::time::millis")]
        client_ts: u64,
    },

    /// Reply to a [`SignalingMessage::LatencyProbe`], echoing `client_ts`
    LatencyProbeReply {
        #[serde(deserialize_with = "crate::time::millis")]
        client_ts: u64,
        #[serde(deserialize_with = "crate::time::millis")]
        server_send_ts: u64,
    },

    /// Broadcaster (re)joined the session
    BroadcasterJoined,

    /// Broadcaster left the session
    BroadcasterLeft,

    /// Server-side rejection or failure
    Error {
        message: String,
    },
}

impl SignalingMessage {
    /// Short name of the variant, as used in the wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Connected { .. } => "connected",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::LatencyProbe { .. } => "latency_probe",
            Self::LatencyProbeReply { .. } => "latency_probe_reply",
            Self::BroadcasterJoined => "broadcaster_joined",
            Self::BroadcasterLeft => "broadcaster_left",
            Self::Error { .. } => "error",
        }
    }

    /// Encode for sending, stamped with the session code and a client timestamp.
    pub fn to_wire(&self, code: &SessionCode, client_ts: u64) -> ValueResult<String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| ValueError::SerializationError(e.to_string()))?;

        let object = value.as_object_mut().ok_or_else(|| {
            ValueError::SerializationError(format!("{} did not encode to an object", self.kind()))
        })?;
        object.insert("code".to_string(), serde_json::Value::from(code.as_str()));
        object.insert("clientTs".to_string(), serde_json::Value::from(client_ts));

        serde_json::to_string(&value).map_err(|e| ValueError::SerializationError(e.to_string()))
    }

    /// Decode an inbound text frame. Unknown `type` tags and malformed
    /// payloads are errors; callers drop them.
    pub fn from_wire(text: &str) -> ValueResult<Self> {
        serde_json::from_str(text).map_err(|e| ValueError::DeserializationError(e.to_string()))
    }
}

/// SDP type for the HTTP offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer to establish connection
    Offer,

    /// Answer to an offer
    Answer,
}

/// Body of the non-multiplexed offer POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub code: SessionCode,
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

/// Response of the non-multiplexed offer POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}
