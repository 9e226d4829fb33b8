//! Real WebRTC peer connection using the webrtc crate

use crate::{
    config::WebRtcConfig,
    error::{WebRtcError, WebRtcResult},
    traits::{MediaTransport, MediaTransportFactory},
    types::{IceState, InboundStream, MediaEvent, MediaEventSender, MediaKind, TransportStats},
};
use async_trait::async_trait;
use liveview_common::{SharedClock, TaskScope};
use liveview_values::IceCandidateInit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::{
    api::{interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder},
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_connection_state::RTCIceConnectionState,
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, sdp::session_description::RTCSessionDescription,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_receiver::RTCRtpReceiver,
        rtp_transceiver_direction::RTCRtpTransceiverDirection, RTCRtpTransceiver,
        RTCRtpTransceiverInit,
    },
    track::track_remote::TrackRemote,
};

/// Frame counters shared with the track readers
#[derive(Debug, Default)]
struct FrameCounters {
    frames: AtomicU64,
    last_packet_ms: AtomicU64,
}

/// Peer connection wrapper implementing [`MediaTransport`]
pub struct PeerConnectionHandler {
    /// Underlying WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Counters fed by inbound video readers
    counters: Arc<FrameCounters>,

    /// Track reader tasks
    readers: Arc<TaskScope>,
}

impl PeerConnectionHandler {
    /// Create a new peer connection that reports through `events`
    pub async fn new(
        config: &WebRtcConfig,
        events: MediaEventSender,
        clock: SharedClock,
    ) -> WebRtcResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            WebRtcError::Transport(format!("Failed to register codecs: {}", e))
        })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| WebRtcError::Transport(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // STUN only
        let ice_servers = if config.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }]
        };

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            WebRtcError::Transport(format!("Failed to create peer connection: {}", e))
        })?;

        let handler = Self {
            peer_connection: Arc::new(peer_connection),
            counters: Arc::new(FrameCounters::default()),
            readers: Arc::new(TaskScope::new("track-readers")),
        };
        handler.install_handlers(events, clock);

        Ok(handler)
    }

    fn install_handlers(&self, events: MediaEventSender, clock: SharedClock) {
        let ice_events = events.clone();
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                tracing::debug!("ICE connection state: {}", state);
                if let Some(state) = ice_state(state) {
                    ice_events.send(MediaEvent::IceConnectionState(state));
                }
                Box::pin(async {})
            }));

        let candidate_events = events.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            events.send(MediaEvent::LocalCandidate(IceCandidateInit {
                                candidate: init.candidate,
                                sdp_mline_index: init.sdp_mline_index,
                                sdp_mid: init.sdp_mid,
                            }));
                        }
                        Err(e) => tracing::warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));

        let counters = self.counters.clone();
        let readers = self.readers.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                let stream = InboundStream {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    codec: track.codec().capability.mime_type,
                };
                tracing::info!(
                    "Inbound {:?} track {} ({})",
                    stream.kind,
                    stream.track_id,
                    stream.codec
                );
                events.send(MediaEvent::TrackArrived(Arc::new(stream)));

                readers.spawn(read_track(track, kind, counters.clone(), clock.clone()));
                Box::pin(async {})
            },
        ));
    }
}

/// Drain a remote track, counting video frames by RTP marker bit
async fn read_track(
    track: Arc<TrackRemote>,
    kind: MediaKind,
    counters: Arc<FrameCounters>,
    clock: SharedClock,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if kind != MediaKind::Video {
                    continue;
                }
                counters.last_packet_ms.store(clock.now_ms(), Ordering::Relaxed);
                if packet.header.marker {
                    counters.frames.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                tracing::debug!("Track {} ended: {}", track.id(), e);
                return;
            }
        }
    }
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceState> {
    match state {
        RTCIceConnectionState::New => Some(IceState::New),
        RTCIceConnectionState::Checking => Some(IceState::Checking),
        RTCIceConnectionState::Connected => Some(IceState::Connected),
        RTCIceConnectionState::Completed => Some(IceState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceState::Failed),
        RTCIceConnectionState::Closed => Some(IceState::Closed),
        _ => None,
    }
}

#[async_trait]
impl MediaTransport for PeerConnectionHandler {
    async fn accept_offer(&self, sdp: &str) -> WebRtcResult<String> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| WebRtcError::Negotiation(format!("Invalid SDP offer: {}", e)))?;

        self.peer_connection.set_remote_description(offer).await.map_err(|e| {
            WebRtcError::Negotiation(format!("Failed to set remote description: {}", e))
        })?;

        let answer = self.peer_connection.create_answer(None).await.map_err(|e| {
            WebRtcError::Negotiation(format!("Failed to create answer: {}", e))
        })?;

        self.peer_connection.set_local_description(answer.clone()).await.map_err(|e| {
            WebRtcError::Negotiation(format!("Failed to set local description: {}", e))
        })?;

        Ok(answer.sdp)
    }

    async fn create_offer(&self) -> WebRtcResult<String> {
        self.peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| WebRtcError::Negotiation(format!("Failed to add transceiver: {}", e)))?;

        let offer = self.peer_connection.create_offer(None).await.map_err(|e| {
            WebRtcError::Negotiation(format!("Failed to create offer: {}", e))
        })?;

        let mut gathered = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection.set_local_description(offer).await.map_err(|e| {
            WebRtcError::Negotiation(format!("Failed to set local description: {}", e))
        })?;

        // Non-trickle: the offer must carry every candidate
        let _ = gathered.recv().await;

        let local = self.peer_connection.local_description().await.ok_or_else(|| {
            WebRtcError::Negotiation("Local description missing after gathering".to_string())
        })?;

        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> WebRtcResult<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| WebRtcError::Negotiation(format!("Invalid SDP answer: {}", e)))?;

        self.peer_connection.set_remote_description(answer).await.map_err(|e| {
            WebRtcError::Negotiation(format!("Failed to set remote description: {}", e))
        })?;

        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidateInit) -> WebRtcResult<()> {
        let ice_candidate = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection.add_ice_candidate(ice_candidate).await.map_err(|e| {
            WebRtcError::Transport(format!("Failed to add ICE candidate: {}", e))
        })?;

        Ok(())
    }

    fn stats(&self) -> TransportStats {
        let frames = self.counters.frames.load(Ordering::Relaxed);
        let last_packet = self.counters.last_packet_ms.load(Ordering::Relaxed);

        // No decoder in the pipeline; a completed frame counts as decoded
        TransportStats {
            frames_received: frames,
            frames_decoded: frames,
            last_packet_received_ms: (last_packet > 0).then_some(last_packet),
        }
    }

    async fn close(&self) -> WebRtcResult<()> {
        self.readers.shutdown().await;
        self.peer_connection.close().await.map_err(|e| {
            WebRtcError::Transport(format!("Failed to close peer connection: {}", e))
        })?;
        Ok(())
    }
}

/// Factory for [`PeerConnectionHandler`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerConnectionFactory;

#[async_trait]
impl MediaTransportFactory for PeerConnectionFactory {
    async fn create(
        &self,
        config: &WebRtcConfig,
        events: MediaEventSender,
        clock: SharedClock,
    ) -> WebRtcResult<Arc<dyn MediaTransport>> {
        let handler = PeerConnectionHandler::new(config, events, clock).await?;
        Ok(Arc::new(handler))
    }
}
