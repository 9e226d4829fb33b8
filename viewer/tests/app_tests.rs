//! Controller tests: in-memory signaling and push servers, fake media transport.

use async_trait::async_trait;
use liveview_common::{MemoryConnector, MemoryPeer, MonotonicClock, SharedClock};
use liveview_inference::{
    FrameSource, InferenceConfig, InferenceResult, InferenceSwitch, InferenceSynchronizer,
    SyncBackends,
};
use liveview_values::{
    BoundingBox, ConnectionStatus, Detection, IceCandidateInit, ImageShape, InferenceFrame,
    InferenceMessage, OfferResponse, SessionCode, TransportKind,
};
use liveview_viewer::{LiveViewer, ViewerConfig, ViewerError};
use liveview_webrtc::{
    IceState, MediaEvent, MediaEventSender, MediaTransport, MediaTransportFactory, OfferExchange,
    SessionBackends, TransportStats, ViewerSession, WebRtcConfig, WebRtcError, WebRtcResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const CONNECTED: &str =
    r#"{"type":"connected","connectionId":"v-1","viewerCount":1,"maxViewers":1,"signalingLatencyMs":8.0}"#;
const OFFER: &str = r#"{"type":"offer","sdp":"v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n"}"#;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeTransport {
    events: MediaEventSender,
    closed: AtomicBool,
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn accept_offer(&self, _sdp: &str) -> WebRtcResult<String> {
        Ok("v=0\r\no=- 2 2 IN IP4 0.0.0.0\r\na=recvonly\r\n".to_string())
    }

    async fn create_offer(&self) -> WebRtcResult<String> {
        Ok("v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n".to_string())
    }

    async fn apply_answer(&self, _sdp: &str) -> WebRtcResult<()> {
        Ok(())
    }

    async fn add_remote_candidate(&self, _candidate: IceCandidateInit) -> WebRtcResult<()> {
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            frames_received: 0,
            frames_decoded: 0,
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
            closed: AtomicBool::new(false),
        });
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

struct NoOffers;

#[async_trait]
impl OfferExchange for NoOffers {
    async fn exchange(&self, _code: &SessionCode, _sdp: String) -> WebRtcResult<OfferResponse> {
        Err(WebRtcError::Http {
            status: Some(503),
            message: "offer endpoint unused".to_string(),
        })
    }
}

struct NoFrames;

#[async_trait]
impl FrameSource for NoFrames {
    async fn fetch_latest(&self, _code: &SessionCode) -> InferenceResult<Option<InferenceFrame>> {
        Ok(None)
    }
}

struct AlwaysOn;

#[async_trait]
impl InferenceSwitch for AlwaysOn {
    async fn set_enabled(&self, _code: &SessionCode, enabled: bool) -> InferenceResult<bool> {
        Ok(enabled)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    viewer: Arc<LiveViewer>,
    signaling: mpsc::UnboundedReceiver<MemoryPeer>,
    push: mpsc::UnboundedReceiver<MemoryPeer>,
    factory: Arc<FakeFactory>,
}

fn harness_with(config: ViewerConfig, inference: bool) -> Harness {
    let (signal_connector, signaling) = MemoryConnector::new();
    let (push_connector, push) = MemoryConnector::new();
    let factory = Arc::new(FakeFactory::default());

    let session = ViewerSession::new(
        WebRtcConfig {
            signaling_url: "ws://signal.test/ws".to_string(),
            ..Default::default()
        },
        SessionBackends {
            connector: Arc::new(signal_connector),
            transports: factory.clone(),
            offers: Arc::new(NoOffers),
            clock: MonotonicClock::shared(),
        },
    );

    let sync = inference.then(|| {
        InferenceSynchronizer::new(
            InferenceConfig {
                ws_url: "ws://infer.test/ws".to_string(),
                ..Default::default()
            },
            SyncBackends {
                connector: Arc::new(push_connector),
                frames: Arc::new(NoFrames),
                switch: Arc::new(AlwaysOn),
                clock: MonotonicClock::shared(),
            },
        )
    });

    Harness {
        viewer: Arc::new(LiveViewer::new(config, session, sync)),
        signaling,
        push,
        factory,
    }
}

fn harness() -> Harness {
    harness_with(ViewerConfig::default(), true)
}

fn code(raw: &str) -> SessionCode {
    SessionCode::parse(raw).unwrap()
}

/// Run the viewer in the background until the returned sender fires
fn spawn_run(h: &Harness) -> (oneshot::Sender<()>, JoinHandle<Result<(), ViewerError>>) {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let viewer = h.viewer.clone();
    let handle = tokio::spawn(async move {
        viewer
            .run(code("4821"), async {
                let _ = stop_rx.await;
            })
            .await
    });
    (stop_tx, handle)
}

async fn accept(peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    timeout(Duration::from_secs(60), peers.recv())
        .await
        .expect("no connection")
        .expect("connector gone")
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

/// Answer the viewer's connect and report ICE connectivity
async fn go_live(h: &mut Harness) -> MemoryPeer {
    let mut signal = accept(&mut h.signaling).await;
    next_message(&mut signal, "connect").await;
    signal.send_text(CONNECTED);
    signal.send_text(OFFER);
    next_message(&mut signal, "answer").await;

    h.factory
        .latest()
        .events
        .send(MediaEvent::IceConnectionState(IceState::Connected));
    signal
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(60), async {
        while !cond() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never saw {}", what));
}

fn knight(timestamp: u64, x: f64, y: f64) -> String {
    let frame = InferenceFrame {
        detections: vec![Detection::new(
            "knight",
            0.9,
            BoundingBox::from_corners(x - 10.0, y - 10.0, x + 10.0, y + 10.0),
        )],
        inference_time_ms: 12.0,
        image_shape: ImageShape { width: 640, height: 480 },
        annotated_image: String::new(),
        timestamp,
        session_code: None,
    };
    serde_json::to_string(&InferenceMessage::InferenceUpdate { data: frame }).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_live_session_reports_deployments() {
    let mut h = harness();
    let (stop, run) = spawn_run(&h);

    let _signal = go_live(&mut h).await;
    let push = accept(&mut h.push).await;
    assert_eq!(push.url, "ws://infer.test/ws/4821");

    // Two bursts of two knights each, far apart in time and space
    for (ts, x, y) in [
        (1_000, 100.0, 100.0),
        (1_400, 110.0, 105.0),
        (5_000, 400.0, 300.0),
        (5_300, 405.0, 310.0),
    ] {
        push.send_text(knight(ts, x, y));
    }

    let viewer = h.viewer.clone();
    wait_until("two deployments", move || viewer.deployments().len() == 2).await;

    let events = h.viewer.deployments();
    assert_eq!(events[0].troop_types, vec!["knight".to_string()]);
    assert_eq!(events[0].detection_count, 2);
    assert_eq!(events[0].timestamp, 1_000);
    assert_eq!(events[1].timestamp, 5_000);

    let report = h.viewer.status_report();
    assert_eq!(report.status, ConnectionStatus::Live);
    assert_eq!(report.deployments.total, 2);
    let state = report.inference.unwrap();
    assert!(state.active);
    assert_eq!(state.transport, TransportKind::Push);
    assert_eq!(report.performance.unwrap().total_detections, 4);

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();

    assert_eq!(h.viewer.session().status(), ConnectionStatus::Idle);
    assert_eq!(h.viewer.session().active_tasks(), 0);
    assert_eq!(h.viewer.synchronizer().unwrap().active_tasks(), 0);
    assert!(h.factory.latest().closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_disconnects() {
    let config = ViewerConfig {
        connect_timeout_secs: 5,
        ..Default::default()
    };
    let mut h = harness_with(config, true);
    let (_stop, run) = spawn_run(&h);

    // The broadcaster never sends an offer
    let mut signal = accept(&mut h.signaling).await;
    next_message(&mut signal, "connect").await;
    signal.send_text(CONNECTED);

    let result = timeout(Duration::from_secs(60), run).await.unwrap().unwrap();
    assert!(matches!(result, Err(ViewerError::ConnectTimeout(d)) if d == Duration::from_secs(5)));

    assert_eq!(h.viewer.session().status(), ConnectionStatus::Idle);
    let sync = h.viewer.synchronizer().unwrap();
    assert!(sync.state().session_code.is_none());
    assert_eq!(sync.active_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_failure_stops_everything() {
    let mut h = harness();
    let (_stop, run) = spawn_run(&h);

    let signal = go_live(&mut h).await;
    let _push = accept(&mut h.push).await;

    signal.send_text(r#"{"type":"error","message":"Session closed by host"}"#);

    let result = timeout(Duration::from_secs(60), run).await.unwrap().unwrap();
    match result {
        Err(ViewerError::SessionFailed(message)) => {
            assert!(message.contains("Session closed by host"))
        }
        other => panic!("expected session failure, got {:?}", other),
    }

    let sync = h.viewer.synchronizer().unwrap();
    assert!(!sync.state().active);
    assert_eq!(sync.active_tasks(), 0);
    assert_eq!(h.viewer.session().active_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_runs_without_inference() {
    let mut h = harness_with(ViewerConfig::default(), false);
    let (stop, run) = spawn_run(&h);

    let _signal = go_live(&mut h).await;
    let viewer = h.viewer.clone();
    wait_until("live", move || viewer.session().status() == ConnectionStatus::Live).await;

    // Let a status tick pass
    sleep(Duration::from_secs(11)).await;

    let report = h.viewer.status_report();
    assert!(report.inference.is_none());
    assert!(report.performance.is_none());
    assert_eq!(report.deployments.total, 0);
    assert!(h.push.try_recv().is_err());

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();
    assert_eq!(h.viewer.session().status(), ConnectionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_enable_inference_before_start() {
    let config = ViewerConfig {
        enable_inference: true,
        ..Default::default()
    };
    let mut h = harness_with(config, true);
    let (stop, run) = spawn_run(&h);

    let _signal = go_live(&mut h).await;
    let push = accept(&mut h.push).await;
    assert_eq!(push.url, "ws://infer.test/ws/4821");

    let sync_code = h.viewer.synchronizer().unwrap().state().session_code;
    assert_eq!(sync_code, Some(code("4821")));

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();
}
