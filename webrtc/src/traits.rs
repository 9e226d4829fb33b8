//! Traits at the session's network seams.
//!
//! The session state machine only talks to these; the `webrtc` crate and the
//! HTTP offer endpoint sit behind them, and tests substitute in-process fakes.

use crate::config::WebRtcConfig;
use crate::error::WebRtcResult;
use crate::types::{MediaEventSender, TransportStats};
use async_trait::async_trait;
use liveview_common::SharedClock;
use liveview_values::{IceCandidateInit, OfferResponse, SessionCode};
use std::sync::Arc;

/// One peer media connection.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Apply a remote offer and return the local answer SDP.
    async fn accept_offer(&self, sdp: &str) -> WebRtcResult<String>;

    /// Create a receive-only offer and return it once ICE gathering completes.
    async fn create_offer(&self) -> WebRtcResult<String>;

    /// Apply the remote answer to an offer created with [`create_offer`](Self::create_offer).
    async fn apply_answer(&self, sdp: &str) -> WebRtcResult<()>;

    /// Add a trickled remote ICE candidate.
    async fn add_remote_candidate(&self, candidate: IceCandidateInit) -> WebRtcResult<()>;

    /// Cumulative counters.
    fn stats(&self) -> TransportStats;

    /// Close the connection and stop its readers.
    async fn close(&self) -> WebRtcResult<()>;
}

/// Creates media transports.
#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    /// Create a transport that reports through `events`.
    async fn create(
        &self,
        config: &WebRtcConfig,
        events: MediaEventSender,
        clock: SharedClock,
    ) -> WebRtcResult<Arc<dyn MediaTransport>>;
}

/// Exchanges an offer for an answer without a signaling channel.
#[async_trait]
pub trait OfferExchange: Send + Sync {
    /// Submit a local offer for `code` and return the remote answer.
    async fn exchange(&self, code: &SessionCode, sdp: String) -> WebRtcResult<OfferResponse>;
}
