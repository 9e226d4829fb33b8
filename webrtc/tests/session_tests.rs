//! Session state machine tests against an in-memory signaling server and a
//! fake media transport.

use async_trait::async_trait;
use liveview_common::{MemoryConnector, MemoryPeer, MonotonicClock, SharedClock};
use liveview_values::{
    ConnectionStatus, IceCandidateInit, OfferResponse, SdpType, SessionCode,
};
use liveview_webrtc::{
    IceState, InboundStream, MediaEvent, MediaEventSender, MediaKind, MediaTransport,
    MediaTransportFactory, OfferExchange, SessionBackends, TransportStats, ViewerSession,
    WebRtcConfig, WebRtcError, WebRtcResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CONNECTED: &str =
    r#"{"type":"connected","connectionId":"v-1","viewerCount":1,"maxViewers":1,"signalingLatencyMs":12.5}"#;
const OFFER: &str = r#"{"type":"offer","sdp":"v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n"}"#;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeTransport {
    events: MediaEventSender,
    offers: Mutex<Vec<String>>,
    answers: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidateInit>>,
    frames: AtomicU64,
    closed: AtomicBool,
}

impl FakeTransport {
    fn emit(&self, event: MediaEvent) {
        self.events.send(event);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn accept_offer(&self, sdp: &str) -> WebRtcResult<String> {
        if !sdp.starts_with("v=0") {
            return Err(WebRtcError::Negotiation("Invalid SDP offer".to_string()));
        }
        self.offers.lock().push(sdp.to_string());
        Ok("v=0\r\no=- 2 2 IN IP4 0.0.0.0\r\na=recvonly\r\n".to_string())
    }

    async fn create_offer(&self) -> WebRtcResult<String> {
        Ok("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: &str) -> WebRtcResult<()> {
        self.answers.lock().push(sdp.to_string());
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidateInit) -> WebRtcResult<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        let frames = self.frames.load(Ordering::SeqCst);
        TransportStats {
            frames_received: frames,
            frames_decoded: frames,
            last_packet_received_ms: None,
        }
    }

    async fn close(&self) -> WebRtcResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    fn count(&self) -> usize {
        self.created.lock().len()
    }

    fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.created.lock()[index].clone()
    }

    fn latest(&self) -> Arc<FakeTransport> {
        self.created.lock().last().cloned().expect("no transport created")
    }
}

#[async_trait]
impl MediaTransportFactory for FakeFactory {
    async fn create(
        &self,
        _config: &WebRtcConfig,
        events: MediaEventSender,
        _clock: SharedClock,
    ) -> WebRtcResult<Arc<dyn MediaTransport>> {
        let transport = Arc::new(FakeTransport {
            events,
            offers: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            frames: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

struct FakeOffers {
    fail: bool,
    received: Mutex<Vec<(SessionCode, String)>>,
}

#[async_trait]
impl OfferExchange for FakeOffers {
    async fn exchange(&self, code: &SessionCode, sdp: String) -> WebRtcResult<OfferResponse> {
        self.received.lock().push((code.clone(), sdp));
        if self.fail {
            return Err(WebRtcError::Http {
                status: Some(503),
                message: "broadcaster offline".to_string(),
            });
        }
        Ok(OfferResponse {
            sdp: "v=0\r\na=sendonly\r\n".to_string(),
            sdp_type: SdpType::Answer,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    session: ViewerSession,
    connector: Arc<MemoryConnector>,
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
    factory: Arc<FakeFactory>,
    offers: Arc<FakeOffers>,
}

fn harness_with(fail_offers: bool) -> Harness {
    let (connector, accepted) = MemoryConnector::new();
    let connector = Arc::new(connector);
    let factory = Arc::new(FakeFactory::default());
    let offers = Arc::new(FakeOffers {
        fail: fail_offers,
        received: Mutex::new(Vec::new()),
    });

    let config = WebRtcConfig {
        signaling_url: "ws://signal.test/ws".to_string(),
        offer_url: "http://signal.test/offer".to_string(),
        ..Default::default()
    };
    let backends = SessionBackends {
        connector: connector.clone(),
        transports: factory.clone(),
        offers: offers.clone(),
        clock: MonotonicClock::shared(),
    };

    Harness {
        session: ViewerSession::new(config, backends),
        connector,
        accepted,
        factory,
        offers,
    }
}

fn harness() -> Harness {
    harness_with(false)
}

fn code(raw: &str) -> SessionCode {
    SessionCode::parse(raw).unwrap()
}

/// Next client message of the given type, skipping keep-alive and probe traffic
async fn next_message(peer: &mut MemoryPeer, kind: &str) -> Value {
    timeout(Duration::from_secs(60), async {
        loop {
            match peer.recv().await {
                Some(liveview_common::LinkCommand::Text(text)) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                other => panic!("expected {} message, got {:?}", kind, other),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {} message", kind))
}

async fn wait_for_status(session: &ViewerSession, status: ConnectionStatus) {
    let mut rx = session.subscribe_status();
    timeout(Duration::from_secs(60), rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("status never became {}", status))
        .unwrap();
}

/// Connect, complete the offer/answer exchange and go live
async fn go_live(h: &mut Harness) -> MemoryPeer {
    h.session.connect(code("4821")).await.unwrap();
    let mut peer = h.accepted.recv().await.unwrap();
    next_message(&mut peer, "connect").await;

    peer.send_text(CONNECTED);
    peer.send_text(OFFER);
    next_message(&mut peer, "answer").await;

    h.factory
        .latest()
        .emit(MediaEvent::IceConnectionState(IceState::Connected));
    wait_for_status(&h.session, ConnectionStatus::Live).await;
    peer
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_single_answer_then_live() {
    let mut h = harness();

    h.session.connect(code("4821")).await.unwrap();
    assert_eq!(h.session.status(), ConnectionStatus::Connecting);

    let mut peer = h.accepted.recv().await.unwrap();
    assert_eq!(peer.url, "ws://signal.test/ws/4821");

    let hello = next_message(&mut peer, "connect").await;
    assert_eq!(hello["role"], "viewer");
    assert_eq!(hello["code"], "4821");
    assert!(hello["clientTs"].is_u64());

    peer.send_text(CONNECTED);
    peer.send_text(OFFER);

    let answer = next_message(&mut peer, "answer").await;
    assert!(answer["sdp"].as_str().unwrap().starts_with("v=0"));
    assert_eq!(answer["code"], "4821");
    assert_eq!(h.session.status(), ConnectionStatus::Connecting);

    h.factory
        .transport(0)
        .emit(MediaEvent::IceConnectionState(IceState::Connected));
    wait_for_status(&h.session, ConnectionStatus::Live).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let later = peer.drain_texts();
    assert!(later.iter().all(|t| !t.contains(r#""type":"answer""#)));
    assert_eq!(h.factory.count(), 1);
    assert_eq!(h.session.latency().signaling_ms, Some(12.5));

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_ping_pong_never_changes_status() {
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let mut peer = h.accepted.recv().await.unwrap();

    peer.send_text(r#"{"type":"ping","ts":1}"#);
    peer.send_text(r#"{"type":"pong","ts":2}"#);
    next_message(&mut peer, "pong").await;
    assert_eq!(h.session.status(), ConnectionStatus::Connecting);

    h.session.disconnect().await;
    let mut peer = go_live(&mut h).await;

    peer.send_text(r#"{"type":"ping","ts":1712000000000}"#);
    peer.send_text(r#"{"type":"pong","ts":1712000000001}"#);
    let pong = next_message(&mut peer, "pong").await;
    assert_eq!(pong["ts"], 1_712_000_000_000u64);

    // Let keep-alives run unanswered
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.session.status(), ConnectionStatus::Live);
    assert!(h.session.last_error().is_none());

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_from_any_state_is_idle_with_no_tasks() {
    // Idle
    let h = harness();
    h.session.disconnect().await;
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert_eq!(h.session.active_tasks(), 0);

    // Connecting
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let _peer = h.accepted.recv().await.unwrap();
    assert!(h.session.active_tasks() > 0);
    h.session.disconnect().await;
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert_eq!(h.session.active_tasks(), 0);

    // Live
    let mut h = harness();
    let _peer = go_live(&mut h).await;
    let transport = h.factory.latest();
    h.session.disconnect().await;
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert_eq!(h.session.active_tasks(), 0);
    assert!(transport.is_closed());
    assert!(h.session.stream().is_none());

    // Disconnected
    let mut h = harness();
    let peer = go_live(&mut h).await;
    peer.send_text(r#"{"type":"broadcaster_left"}"#);
    wait_for_status(&h.session, ConnectionStatus::Disconnected).await;
    h.session.disconnect().await;
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert_eq!(h.session.active_tasks(), 0);

    // Failed, twice
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let peer = h.accepted.recv().await.unwrap();
    peer.send_text(r#"{"type":"error","message":"session full"}"#);
    wait_for_status(&h.session, ConnectionStatus::Failed).await;
    h.session.disconnect().await;
    h.session.disconnect().await;
    assert_eq!(h.session.status(), ConnectionStatus::Idle);
    assert_eq!(h.session.active_tasks(), 0);

    // Nothing keeps ticking afterwards
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.session.active_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_offer_for_other_viewer_discarded() {
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let mut peer = h.accepted.recv().await.unwrap();

    peer.send_text(CONNECTED);
    peer.send_text(r#"{"type":"offer","sdp":"v=0 other","targetViewerId":"v-2"}"#);
    peer.send_text(r#"{"type":"offer","sdp":"v=0 mine","targetViewerId":"v-1"}"#);

    next_message(&mut peer, "answer").await;
    assert_eq!(h.factory.count(), 1);
    assert_eq!(*h.factory.latest().offers.lock(), vec!["v=0 mine".to_string()]);

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_candidates_before_offer_are_queued() {
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let mut peer = h.accepted.recv().await.unwrap();

    peer.send_text(CONNECTED);
    peer.send_text(
        r#"{"type":"ice_candidate","candidate":"candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host","sdpMLineIndex":0,"sdpMid":"0"}"#,
    );
    peer.send_text(OFFER);
    next_message(&mut peer, "answer").await;

    peer.send_text(
        r#"{"type":"ice_candidate","candidate":"candidate:2 1 udp 1686052607 203.0.113.9 50001 typ srflx","sdpMLineIndex":0,"sdpMid":"0"}"#,
    );
    h.factory
        .latest()
        .emit(MediaEvent::IceConnectionState(IceState::Checking));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let candidates = h.factory.latest().candidates.lock().clone();
    assert_eq!(candidates.len(), 2);
    assert!(candidates[0].candidate.starts_with("candidate:1"));
    assert_eq!(candidates[0].sdp_mline_index, Some(0));

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_local_candidates_trickled() {
    let mut h = harness();
    let mut peer = go_live(&mut h).await;

    h.factory.latest().emit(MediaEvent::LocalCandidate(IceCandidateInit {
        candidate: "candidate:9 1 udp 1 192.168.1.4 4000 typ host".to_string(),
        sdp_mline_index: Some(0),
        sdp_mid: Some("0".to_string()),
    }));

    let sent = next_message(&mut peer, "ice_candidate").await;
    assert_eq!(sent["sdpMLineIndex"], 0);
    assert_eq!(sent["sdpMid"], "0");

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_later_offer_replaces_transport() {
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let mut peer = h.accepted.recv().await.unwrap();

    peer.send_text(CONNECTED);
    peer.send_text(OFFER);
    next_message(&mut peer, "answer").await;
    peer.send_text(OFFER);
    next_message(&mut peer, "answer").await;

    assert_eq!(h.factory.count(), 2);
    let first = h.factory.transport(0);
    assert!(first.is_closed());

    // Stragglers from the replaced transport are ignored
    first.emit(MediaEvent::IceConnectionState(IceState::Connected));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.session.status(), ConnectionStatus::Connecting);

    h.factory
        .transport(1)
        .emit(MediaEvent::IceConnectionState(IceState::Completed));
    wait_for_status(&h.session, ConnectionStatus::Live).await;

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_track_binds_stream() {
    let mut h = harness();
    let _peer = go_live(&mut h).await;

    let stream = Arc::new(InboundStream {
        track_id: "video0".to_string(),
        stream_id: "broadcast".to_string(),
        kind: MediaKind::Video,
        codec: "video/VP8".to_string(),
    });
    let mut bound = h.session.subscribe_stream();
    h.factory
        .latest()
        .emit(MediaEvent::TrackArrived(stream.clone()));

    timeout(Duration::from_secs(5), bound.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.session.stream(), Some(stream));

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_broadcaster_left_then_rejoined() {
    let mut h = harness();
    let mut peer = go_live(&mut h).await;
    let first = h.factory.latest();

    peer.send_text(r#"{"type":"broadcaster_left"}"#);
    wait_for_status(&h.session, ConnectionStatus::Disconnected).await;
    assert!(first.is_closed());

    peer.send_text(r#"{"type":"broadcaster_joined"}"#);
    wait_for_status(&h.session, ConnectionStatus::Reconnecting).await;

    peer.send_text(OFFER);
    next_message(&mut peer, "answer").await;
    h.factory
        .latest()
        .emit(MediaEvent::IceConnectionState(IceState::Connected));
    wait_for_status(&h.session, ConnectionStatus::Live).await;
    assert_eq!(h.factory.count(), 2);

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_ice_loss_while_live_disconnects_without_retry() {
    let mut h = harness();
    let _peer = go_live(&mut h).await;
    let mut errors = h.session.subscribe_errors();

    h.factory
        .latest()
        .emit(MediaEvent::IceConnectionState(IceState::Failed));
    wait_for_status(&h.session, ConnectionStatus::Disconnected).await;

    let error = errors.recv().await.unwrap();
    assert_eq!(error.code.as_deref(), Some("transport_error"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.session.status(), ConnectionStatus::Disconnected);
    assert_eq!(h.factory.count(), 1);

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_error_fails_session() {
    let mut h = harness();
    h.session.connect(code("4821")).await.unwrap();
    let peer = h.accepted.recv().await.unwrap();
    let mut errors = h.session.subscribe_errors();

    peer.send_text(r#"{"type":"error","message":"Session 4821 not found"}"#);
    wait_for_status(&h.session, ConnectionStatus::Failed).await;

    let error = errors.recv().await.unwrap();
    assert_eq!(error.code.as_deref(), Some("signaling_error"));
    assert!(error.message.contains("not found"));
    assert_eq!(h.session.last_error(), Some(error));

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_then_reconnect() {
    let mut h = harness();
    h.connector.refuse_next("connection refused");

    let err = h.session.connect(code("4821")).await.unwrap_err();
    assert_eq!(err.code(), "signaling_error");
    assert_eq!(h.session.status(), ConnectionStatus::Failed);
    assert_eq!(h.session.active_tasks(), 0);

    h.session.connect(code("4821")).await.unwrap();
    assert_eq!(h.session.status(), ConnectionStatus::Reconnecting);
    assert!(h.session.last_error().is_none());
    let _peer = h.accepted.recv().await.unwrap();
    assert_eq!(h.connector.attempts(), 2);

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_signaling_close_while_live() {
    let mut h = harness();
    let peer = go_live(&mut h).await;

    peer.close(1006, "abnormal");
    wait_for_status(&h.session, ConnectionStatus::Disconnected).await;
    assert_eq!(h.session.last_error().unwrap().code.as_deref(), Some("signaling_error"));
    assert!(h.factory.latest().is_closed());

    let mut h = harness();
    let peer = go_live(&mut h).await;
    peer.close(liveview_common::NORMAL_CLOSURE, "bye");
    wait_for_status(&h.session, ConnectionStatus::Disconnected).await;
    assert!(h.session.last_error().is_none());

    h.session.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_latency_probe_and_stats_sampling() {
    let mut h = harness();
    let mut peer = go_live(&mut h).await;

    let probe = next_message(&mut peer, "latency_probe").await;
    let client_ts = probe["clientTs"].as_u64().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer.send_text(format!(
        r#"{{"type":"latency_probe_reply","clientTs":{},"serverSendTs":{}}}"#,
        client_ts,
        client_ts + 40
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.session.latency().network_ms, Some(50.0));

    h.factory.latest().frames.store(30, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let report = h.session.latency();
    assert_eq!(report.sample_count, 1);
    // No packet timestamp: capture ≈ now − network − 30ms encode delay
    assert_eq!(report.current, 80.0);
    assert_eq!(report.signaling_ms, Some(12.5));
    assert_eq!(h.session.transport_stats().map(|s| s.frames()), Some(30));

    h.session.disconnect().await;
    assert!(h.session.transport_stats().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connect_direct() {
    let h = harness();

    h.session.connect_direct(code("4821")).await.unwrap();
    assert_eq!(h.session.status(), ConnectionStatus::Connecting);

    let transport = h.factory.latest();
    assert_eq!(transport.answers.lock().len(), 1);
    let received = h.offers.received.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, code("4821"));
    assert!(received[0].1.contains("a=recvonly"));

    transport.emit(MediaEvent::IceConnectionState(IceState::Connected));
    wait_for_status(&h.session, ConnectionStatus::Live).await;
    assert_eq!(h.connector.attempts(), 0);

    h.session.disconnect().await;
    assert_eq!(h.session.active_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_direct_failure() {
    let h = harness_with(true);

    let err = h.session.connect_direct(code("4821")).await.unwrap_err();
    assert_eq!(err.code(), "http_error");
    assert_eq!(h.session.status(), ConnectionStatus::Failed);
    assert!(h.factory.latest().is_closed());
    assert_eq!(h.session.active_tasks(), 0);
}
