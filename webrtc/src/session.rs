//! Viewer media session state machine
//!
//! A [`ViewerSession`] owns every handle of one viewing session: the
//! signaling channel, the media transport and the timers that sample latency.
//! All of them run inside a single event-loop task, so signaling messages,
//! transport events and timer ticks are processed strictly in order and at
//! most one offer negotiation is in flight.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ICE connected──▶ Live
//!                        │                          │ ICE lost / broadcaster left /
//!                        │                          ▼ signaling closed
//!                        │                     Disconnected ──connect / broadcaster joined──▶ Reconnecting
//!                        └── server error / open failure ──▶ Failed
//! any ──disconnect──▶ Idle
//! ```

use crate::config::WebRtcConfig;
use crate::error::{WebRtcError, WebRtcResult};
use crate::http_signaling::HttpOfferClient;
use crate::latency::LatencyEstimator;
use crate::peer_connection::PeerConnectionFactory;
use crate::signaling::{SignalingChannel, SignalingEvent};
use crate::traits::{MediaTransport, MediaTransportFactory, OfferExchange};
use crate::types::{IceState, InboundStream, MediaEvent, MediaEventSender, TransportStats};
use liveview_common::{
    DuplexConnector, MonotonicClock, SharedClock, TaskScope, WebSocketConnector, NORMAL_CLOSURE,
};
use liveview_values::{
    ConnectionError, ConnectionStatus, IceCandidateInit, LatencyReport, Role, SessionCode,
    SignalingMessage,
};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Capacity of the error broadcast
const ERROR_CHANNEL_CAPACITY: usize = 32;

/// Network collaborators of a session
#[derive(Clone)]
pub struct SessionBackends {
    /// Opens the signaling channel
    pub connector: Arc<dyn DuplexConnector>,

    /// Creates peer media connections
    pub transports: Arc<dyn MediaTransportFactory>,

    /// Offer/answer exchange for [`ViewerSession::connect_direct`]
    pub offers: Arc<dyn OfferExchange>,

    /// Timestamp source
    pub clock: SharedClock,
}

impl SessionBackends {
    /// WebSocket signaling, `webrtc` transports and the HTTP offer endpoint
    pub fn network(config: &WebRtcConfig) -> WebRtcResult<Self> {
        Ok(Self {
            connector: Arc::new(WebSocketConnector),
            transports: Arc::new(PeerConnectionFactory),
            offers: Arc::new(HttpOfferClient::new(config)?),
            clock: MonotonicClock::shared(),
        })
    }
}

/// State shared between the session handle and its event loop
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    stream: watch::Sender<Option<Arc<InboundStream>>>,
    errors: broadcast::Sender<ConnectionError>,
    last_error: Mutex<Option<ConnectionError>>,
    latency: Mutex<LatencyEstimator>,
    code: Mutex<Option<SessionCode>>,
    signaling: Mutex<Option<Arc<SignalingChannel>>>,
    transport: Mutex<Option<Arc<dyn MediaTransport>>>,
    /// Generation of the current transport; events from older ones are ignored
    generation: AtomicU64,
}

impl Shared {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, next: ConnectionStatus) {
        let previous = self.status.send_replace(next);
        if previous != next {
            tracing::info!("Session status: {} → {}", previous, next);
        }
    }

    fn report(&self, err: &WebRtcError) {
        tracing::error!("{}", err);
        let value = err.to_connection_error();
        *self.last_error.lock() = Some(value.clone());
        let _ = self.errors.send(value);
    }

    fn fail(&self, err: &WebRtcError) {
        self.report(err);
        self.set_status(ConnectionStatus::Failed);
    }

    fn current_transport(&self) -> Option<Arc<dyn MediaTransport>> {
        self.transport.lock().clone()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Close the current transport and unbind the inbound stream
    async fn release_transport(&self) {
        self.next_generation();
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::warn!("Error closing transport: {}", e);
            }
        }
        self.stream.send_replace(None);
    }
}

/// One viewer's media session
pub struct ViewerSession {
    config: WebRtcConfig,
    backends: SessionBackends,
    shared: Arc<Shared>,
    tasks: TaskScope,
    /// Serializes connect/disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

impl ViewerSession {
    pub fn new(config: WebRtcConfig, backends: SessionBackends) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let (stream, _) = watch::channel(None);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            status,
            stream,
            errors,
            last_error: Mutex::new(None),
            latency: Mutex::new(LatencyEstimator::new(config.encoding_delay_ms)),
            code: Mutex::new(None),
            signaling: Mutex::new(None),
            transport: Mutex::new(None),
            generation: AtomicU64::new(0),
        });

        Self {
            config,
            backends,
            shared,
            tasks: TaskScope::new("viewer-session"),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Session backed by the real network stack
    pub fn from_config(config: WebRtcConfig) -> WebRtcResult<Self> {
        config.validate()?;
        let backends = SessionBackends::network(&config)?;
        Ok(Self::new(config, backends))
    }

    /// Join `code` through the signaling channel.
    ///
    /// Returns once the channel is open and the viewer has announced itself;
    /// negotiation continues in the background. Calling this after a loss
    /// (`Disconnected` or `Failed`) reports `Reconnecting` instead of
    /// `Connecting`.
    pub async fn connect(&self, code: SessionCode) -> WebRtcResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.begin(&code).await;

        let opened = SignalingChannel::open(
            self.backends.connector.as_ref(),
            &self.config,
            &code,
            self.backends.clock.clone(),
            &self.tasks,
        )
        .await;

        let (signaling, events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.shared.fail(&e);
                return Err(e);
            }
        };

        *self.shared.signaling.lock() = Some(signaling.clone());
        signaling.send(SignalingMessage::Connect {
            role: Role::Viewer,
            code: code.clone(),
        });

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let driver = self.driver(code, Some(signaling), media_tx);
        self.tasks.spawn(driver.run(Some(events), media_rx));

        Ok(())
    }

    /// Join `code` without a signaling channel.
    ///
    /// Creates a receive-only offer, waits for ICE gathering, posts it to the
    /// offer endpoint and applies the returned answer.
    pub async fn connect_direct(&self, code: SessionCode) -> WebRtcResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.begin(&code).await;

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let generation = self.shared.next_generation();

        let negotiated = async {
            let transport = self
                .backends
                .transports
                .create(
                    &self.config,
                    MediaEventSender::new(generation, media_tx.clone()),
                    self.backends.clock.clone(),
                )
                .await?;
            *self.shared.transport.lock() = Some(transport.clone());

            let offer = transport.create_offer().await?;
            let answer = self.backends.offers.exchange(&code, offer).await?;
            transport.apply_answer(&answer.sdp).await
        }
        .await;

        if let Err(e) = negotiated {
            self.shared.fail(&e);
            self.teardown().await;
            return Err(e);
        }

        let driver = self.driver(code, None, media_tx);
        self.tasks.spawn(driver.run(None, media_rx));

        Ok(())
    }

    /// Tear everything down and return to `Idle`. Safe from any state.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
        *self.shared.code.lock() = None;
        self.shared.set_status(ConnectionStatus::Idle);
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Currently bound inbound stream
    pub fn stream(&self) -> Option<Arc<InboundStream>> {
        self.shared.stream.borrow().clone()
    }

    /// Watch inbound stream binding
    pub fn subscribe_stream(&self) -> watch::Receiver<Option<Arc<InboundStream>>> {
        self.shared.stream.subscribe()
    }

    /// Receive connection errors reported from now on
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.shared.errors.subscribe()
    }

    /// Most recent connection error
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.shared.last_error.lock().clone()
    }

    /// Session code of the current connection
    pub fn code(&self) -> Option<SessionCode> {
        self.shared.code.lock().clone()
    }

    /// Latency figures
    pub fn latency(&self) -> LatencyReport {
        self.shared.latency.lock().report()
    }

    /// Counters of the current media transport
    pub fn transport_stats(&self) -> Option<TransportStats> {
        self.shared.current_transport().map(|t| t.stats())
    }

    /// Background tasks still running
    pub fn active_tasks(&self) -> usize {
        self.tasks.active()
    }

    async fn begin(&self, code: &SessionCode) {
        let resuming = self.shared.status().is_after_loss();
        self.teardown().await;

        *self.shared.code.lock() = Some(code.clone());
        *self.shared.last_error.lock() = None;
        self.shared.set_status(if resuming {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        });
        tracing::info!("Connecting to session {}", code);
    }

    async fn teardown(&self) {
        self.tasks.shutdown().await;

        let signaling = self.shared.signaling.lock().take();
        if let Some(signaling) = signaling {
            signaling.close(NORMAL_CLOSURE, "viewer disconnected");
        }

        self.shared.release_transport().await;
        self.shared.latency.lock().reset();
    }

    fn driver(
        &self,
        code: SessionCode,
        signaling: Option<Arc<SignalingChannel>>,
        media_tx: mpsc::UnboundedSender<(u64, MediaEvent)>,
    ) -> SessionDriver {
        SessionDriver {
            code,
            config: self.config.clone(),
            clock: self.backends.clock.clone(),
            transports: self.backends.transports.clone(),
            shared: self.shared.clone(),
            signaling,
            media_tx,
            connection_id: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }
}

/// Event loop of one connection attempt
struct SessionDriver {
    code: SessionCode,
    config: WebRtcConfig,
    clock: SharedClock,
    transports: Arc<dyn MediaTransportFactory>,
    shared: Arc<Shared>,
    signaling: Option<Arc<SignalingChannel>>,
    media_tx: mpsc::UnboundedSender<(u64, MediaEvent)>,
    connection_id: Option<String>,
    remote_description_set: bool,
    /// Remote candidates received before the remote description was set
    pending_candidates: Vec<IceCandidateInit>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut signaling_events: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
        mut media: mpsc::UnboundedReceiver<(u64, MediaEvent)>,
    ) {
        let mut stats = interval_at(
            Instant::now() + self.config.stats_interval,
            self.config.stats_interval,
        );
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut probe = interval_at(
            Instant::now() + self.config.probe_interval,
            self.config.probe_interval,
        );
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = next_signaling(&mut signaling_events) => {
                    let flow = match event {
                        Some(event) => self.on_signaling(event).await,
                        None => {
                            self.on_signaling_lost(None, "signaling channel ended");
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                Some((generation, event)) = media.recv() => {
                    if generation == self.shared.generation.load(Ordering::SeqCst) {
                        self.on_media(event);
                    } else {
                        tracing::trace!("Ignoring event from replaced transport {}", generation);
                    }
                }
                _ = stats.tick() => self.sample_latency(),
                _ = probe.tick(), if self.signaling.is_some() => {
                    self.send(SignalingMessage::LatencyProbe { client_ts: self.clock.now_ms() });
                }
            }
        }

        self.shared.release_transport().await;
        tracing::debug!("Session {} event loop finished", self.code);
    }

    async fn on_signaling(&mut self, event: SignalingEvent) -> ControlFlow<()> {
        match event {
            SignalingEvent::Message(message) => self.on_message(message).await,
            SignalingEvent::Error(reason) => {
                tracing::warn!("Signaling transport error: {}", reason);
                ControlFlow::Continue(())
            }
            SignalingEvent::Closed { code, reason } => {
                self.on_signaling_lost(code, &reason);
                ControlFlow::Break(())
            }
        }
    }

    async fn on_message(&mut self, message: SignalingMessage) -> ControlFlow<()> {
        match message {
            SignalingMessage::Connected {
                connection_id,
                viewer_count,
                max_viewers,
                signaling_latency_ms,
            } => {
                tracing::info!(
                    "Joined session {} as {} ({}/{} viewers)",
                    self.code,
                    connection_id,
                    viewer_count,
                    max_viewers
                );
                if let Some(ms) = signaling_latency_ms {
                    self.shared.latency.lock().set_signaling_latency(ms);
                }
                self.connection_id = Some(connection_id);
            }
            SignalingMessage::Offer { sdp, target_viewer_id } => {
                self.on_offer(sdp, target_viewer_id).await;
            }
            SignalingMessage::IceCandidate(candidate) => {
                self.on_remote_candidate(candidate).await;
            }
            SignalingMessage::Ping { ts } => self.send(SignalingMessage::Pong { ts }),
            SignalingMessage::Pong { ts } => tracing::trace!("Pong {}", ts),
            SignalingMessage::LatencyProbeReply { client_ts, .. } => {
                let now = self.clock.now_ms();
                if let Some(one_way) = self.shared.latency.lock().record_probe(client_ts, now) {
                    tracing::debug!("Network latency: {:.1} ms", one_way);
                }
            }
            SignalingMessage::BroadcasterJoined => {
                if self.shared.status() == ConnectionStatus::Disconnected {
                    tracing::info!("Broadcaster rejoined session {}", self.code);
                    self.reset_negotiation().await;
                    self.shared.set_status(ConnectionStatus::Reconnecting);
                }
            }
            SignalingMessage::BroadcasterLeft => {
                tracing::info!("Broadcaster left session {}", self.code);
                self.reset_negotiation().await;
                if self.is_connected_or_pending() {
                    self.shared.set_status(ConnectionStatus::Disconnected);
                }
            }
            SignalingMessage::Error { message } => {
                self.shared.fail(&WebRtcError::Signaling(message));
                if let Some(signaling) = &self.signaling {
                    signaling.close(NORMAL_CLOSURE, "session failed");
                }
                return ControlFlow::Break(());
            }
            other @ (SignalingMessage::Connect { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::LatencyProbe { .. }) => {
                tracing::debug!("Ignoring unexpected {} message", other.kind());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_offer(&mut self, sdp: String, target_viewer_id: Option<String>) {
        if let Some(target) = target_viewer_id {
            if self.connection_id.as_deref() != Some(target.as_str()) {
                tracing::debug!("Discarding offer addressed to viewer {}", target);
                return;
            }
        }

        if self.shared.status() == ConnectionStatus::Disconnected {
            self.shared.set_status(ConnectionStatus::Reconnecting);
        }

        // Last writer wins: a newer offer replaces whatever was negotiated before
        self.reset_negotiation().await;
        let generation = self.shared.next_generation();
        let created = self
            .transports
            .create(
                &self.config,
                MediaEventSender::new(generation, self.media_tx.clone()),
                self.clock.clone(),
            )
            .await;

        let transport = match created {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.report(&e);
                return;
            }
        };
        *self.shared.transport.lock() = Some(transport.clone());

        match transport.accept_offer(&sdp).await {
            Ok(answer) => {
                self.remote_description_set = true;
                for candidate in std::mem::take(&mut self.pending_candidates) {
                    if let Err(e) = transport.add_remote_candidate(candidate).await {
                        tracing::warn!("Dropping queued ICE candidate: {}", e);
                    }
                }
                self.send(SignalingMessage::Answer { sdp: answer });
            }
            Err(e) => self.shared.report(&e),
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidateInit) {
        let transport = self.shared.current_transport();
        match transport {
            Some(transport) if self.remote_description_set => {
                if let Err(e) = transport.add_remote_candidate(candidate).await {
                    tracing::warn!("Dropping ICE candidate: {}", e);
                }
            }
            _ => {
                tracing::debug!("Queueing ICE candidate until the offer is applied");
                self.pending_candidates.push(candidate);
            }
        }
    }

    fn on_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::IceConnectionState(state) => {
                let status = self.shared.status();
                if state.is_connected() {
                    if status.is_pending() {
                        self.shared.set_status(ConnectionStatus::Live);
                    }
                } else if state.is_lost() {
                    match status {
                        ConnectionStatus::Live => {
                            self.shared.report(&WebRtcError::Transport(format!(
                                "ICE connectivity {:?}",
                                state
                            )));
                            self.shared.set_status(ConnectionStatus::Disconnected);
                        }
                        s if s.is_pending() && state == IceState::Failed => {
                            self.shared.report(&WebRtcError::Transport(
                                "ICE connectivity failed".to_string(),
                            ));
                            self.shared.set_status(ConnectionStatus::Disconnected);
                        }
                        _ => tracing::debug!("ICE {:?} while {}", state, status),
                    }
                }
            }
            MediaEvent::LocalCandidate(candidate) => {
                self.send(SignalingMessage::IceCandidate(candidate));
            }
            MediaEvent::TrackArrived(stream) => {
                tracing::info!("Bound inbound {:?} stream {}", stream.kind, stream.stream_id);
                self.shared.stream.send_replace(Some(stream));
            }
        }
    }

    fn on_signaling_lost(&mut self, code: Option<u16>, reason: &str) {
        if !self.is_connected_or_pending() {
            return;
        }
        if code != Some(NORMAL_CLOSURE) {
            self.shared.report(&WebRtcError::Signaling(format!(
                "Signaling channel closed ({}): {}",
                code.map(|c| c.to_string()).unwrap_or_else(|| "no close frame".to_string()),
                reason
            )));
        }
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    fn sample_latency(&self) {
        let Some(transport) = self.shared.current_transport() else {
            return;
        };
        let stats = transport.stats();
        let now = self.clock.now_ms();
        if let Some(sample) = self.shared.latency.lock().observe(&stats, now) {
            tracing::trace!("Latency sample {}: {:.1} ms", sample.frame_id, sample.end_to_end_ms);
        }
    }

    async fn reset_negotiation(&mut self) {
        self.shared.release_transport().await;
        self.remote_description_set = false;
    }

    fn is_connected_or_pending(&self) -> bool {
        let status = self.shared.status();
        status == ConnectionStatus::Live || status.is_pending()
    }

    fn send(&self, message: SignalingMessage) {
        match &self.signaling {
            Some(signaling) => signaling.send(message),
            None => tracing::trace!("No signaling channel, dropping {}", message.kind()),
        }
    }
}

async fn next_signaling(
    events: &mut Option<mpsc::UnboundedReceiver<SignalingEvent>>,
) -> Option<SignalingEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
