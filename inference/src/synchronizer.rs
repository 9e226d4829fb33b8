//! Inference synchronizer
//!
//! Keeps the detection history and performance statistics of one session
//! in step with the inference producer. Frames arrive over the push channel
//! when it works and over HTTP polling when it does not:
//!
//! ```text
//! start ──▶ push connecting ──frame──▶ push delivering (poller off)
//!   │             │
//!   │   3 s, push not open / push lost after 3 s / push closed or exhausted
//!   │             ▼
//!   └──────▶ polling every 200 ms ──501──▶ inactive
//! ```
//!
//! Push and poll can both deliver the same frame during a handover. Frames
//! are keyed by producer timestamp within the session and each key is
//! applied once.

use crate::backoff::Reconnect;
use crate::config::InferenceConfig;
use crate::error::{InferenceError, InferenceResult};
use crate::history::HistoryStore;
use crate::poll::{FrameSource, HttpFrameSource};
use crate::push::PushChannel;
use crate::stats::PerformanceTracker;
use crate::toggle::{HttpInferenceSwitch, InferenceSwitch};
use liveview_common::{
    DuplexConnector, MonotonicClock, SharedClock, TaskScope, WebSocketConnector, NORMAL_CLOSURE,
};
use liveview_values::{
    HistoryEntry, InferenceFrame, PerformanceStats, SessionCode, TransportKind,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Input to the synchronizer's event loop
#[derive(Debug)]
pub enum SyncEvent {
    /// Push connection attempt started
    PushConnecting,

    /// Push channel open
    PushOpened,

    /// Frame delivered over push
    PushFrame(InferenceFrame),

    /// Server reported an error over push
    ServerError(String),

    /// Push connection attempt failed
    PushFailed(String),

    /// Push channel closed
    PushClosed { code: Option<u16>, reason: String },

    /// Push reconnection budget spent
    PushExhausted,

    /// Result of one poll
    Polled(InferenceResult<Option<InferenceFrame>>),
}

/// Observable synchronizer state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Session being synchronized
    pub session_code: Option<SessionCode>,

    /// Frames are arriving
    pub active: bool,

    /// Transport that delivered the latest frame
    pub transport: TransportKind,

    /// Push channel currently open
    pub push_open: bool,

    /// Poller running
    pub polling: bool,

    /// Push connection attempts since start
    pub connection_attempts: u32,

    /// Receive time of the latest frame (ms)
    pub last_update_ms: Option<u64>,

    /// Most recent error
    pub last_error: Option<String>,
}

/// Network collaborators of a synchronizer
#[derive(Clone)]
pub struct SyncBackends {
    /// Opens the push channel
    pub connector: Arc<dyn DuplexConnector>,

    /// Latest-frame endpoint
    pub frames: Arc<dyn FrameSource>,

    /// Inference on/off endpoint
    pub switch: Arc<dyn InferenceSwitch>,

    /// Timestamp source
    pub clock: SharedClock,
}

impl SyncBackends {
    /// WebSocket push channel and the HTTP endpoints
    pub fn network(config: &InferenceConfig) -> InferenceResult<Self> {
        Ok(Self {
            connector: Arc::new(WebSocketConnector),
            frames: Arc::new(HttpFrameSource::new(config)?),
            switch: Arc::new(HttpInferenceSwitch::new(config)?),
            clock: MonotonicClock::shared(),
        })
    }
}

struct Shared {
    state: watch::Sender<SyncState>,
    history: Arc<HistoryStore>,
    performance: Mutex<PerformanceTracker>,
}

/// Synchronizes inference results for one session at a time
pub struct InferenceSynchronizer {
    config: InferenceConfig,
    backends: SyncBackends,
    shared: Arc<Shared>,
    tasks: TaskScope,
    /// Serializes start/stop
    lifecycle: tokio::sync::Mutex<()>,
}

impl InferenceSynchronizer {
    pub fn new(config: InferenceConfig, backends: SyncBackends) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        let shared = Arc::new(Shared {
            state,
            history: Arc::new(HistoryStore::new(config.history_capacity)),
            performance: Mutex::new(PerformanceTracker::new(config.stats_capacity)),
        });

        Self {
            config,
            backends,
            shared,
            tasks: TaskScope::new("inference-sync"),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Synchronizer backed by the real network stack
    pub fn from_config(config: InferenceConfig) -> InferenceResult<Self> {
        config.validate()?;
        let backends = SyncBackends::network(&config)?;
        Ok(Self::new(config, backends))
    }

    /// Start synchronizing `code`, replacing any running synchronization.
    ///
    /// History and statistics carry over when restarting the same session
    /// and are cleared when switching to another one.
    pub async fn start(&self, code: SessionCode) {
        let _guard = self.lifecycle.lock().await;
        self.tasks.shutdown().await;

        let previous = self.shared.state.borrow().session_code.clone();
        if previous.as_ref() != Some(&code) {
            self.shared.history.clear();
            self.shared.performance.lock().reset();
        }

        self.shared.state.send_replace(SyncState {
            session_code: Some(code.clone()),
            active: true,
            ..SyncState::default()
        });
        tracing::info!("Starting inference synchronization for session {}", code);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (polling_tx, polling_rx) = watch::channel(false);

        let push = PushChannel::new(
            self.config.push_endpoint(code.as_str()),
            self.backends.connector.clone(),
            self.config.keepalive_interval,
            Reconnect::new(
                self.config.max_reconnect_attempts,
                self.config.backoff_base,
                self.config.backoff_cap,
            ),
            events_tx.clone(),
        );
        self.tasks.spawn(push.run());

        self.tasks.spawn(run_poller(
            code.clone(),
            self.backends.frames.clone(),
            self.config.poll_interval,
            polling_rx,
            events_tx,
        ));

        let driver = SyncDriver {
            code,
            config: self.config.clone(),
            clock: self.backends.clock.clone(),
            shared: self.shared.clone(),
            polling: polling_tx,
            seen: RecentKeys::new(self.config.dedupe_window),
            push_open: false,
            push_delivered: false,
            push_exhausted: false,
            poll_supported: true,
            fallback_elapsed: false,
        };
        self.tasks.spawn(driver.run(events_rx));
    }

    /// Ask the server to enable inference for `code`, then start if it agrees.
    ///
    /// Returns the state the server reports.
    pub async fn enable_and_start(&self, code: SessionCode) -> InferenceResult<bool> {
        let enabled = self.backends.switch.set_enabled(&code, true).await?;
        if enabled {
            self.start(code).await;
        } else {
            tracing::warn!("Server kept inference disabled for session {}", code);
        }
        Ok(enabled)
    }

    /// Stop synchronizing. Idempotent; history and statistics are kept.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        self.tasks.shutdown().await;

        self.shared.state.send_if_modified(|state| {
            let was_running = state.active || state.push_open || state.polling;
            state.active = false;
            state.push_open = false;
            state.polling = false;
            was_running
        });
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.shared.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.shared.state.subscribe()
    }

    /// Detection history
    pub fn history(&self) -> Arc<HistoryStore> {
        self.shared.history.clone()
    }

    /// Performance statistics as of now
    pub fn performance(&self) -> PerformanceStats {
        let (attempts, transport) = {
            let state = self.shared.state.borrow();
            (state.connection_attempts, state.transport)
        };
        self.shared
            .performance
            .lock()
            .snapshot(self.backends.clock.now_ms(), attempts, transport)
    }

    /// Background tasks still running
    pub fn active_tasks(&self) -> usize {
        self.tasks.active()
    }
}

/// Bounded set of recently applied frame timestamps
#[derive(Debug)]
struct RecentKeys {
    order: VecDeque<u64>,
    keys: HashSet<u64>,
    capacity: usize,
}

impl RecentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            keys: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if `key` was seen recently.
    fn insert(&mut self, key: u64) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }
}

async fn run_poller(
    code: SessionCode,
    frames: Arc<dyn FrameSource>,
    period: Duration,
    mut enabled: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SyncEvent>,
) {
    loop {
        if enabled.wait_for(|on| *on).await.is_err() {
            return;
        }
        tracing::debug!("Polling {} every {:?}", code, period);

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = enabled.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*enabled.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let result = frames.fetch_latest(&code).await;
                    let unsupported = matches!(result, Err(InferenceError::Unsupported));
                    if events.send(SyncEvent::Polled(result)).is_err() || unsupported {
                        return;
                    }
                }
            }
        }
    }
}

struct SyncDriver {
    code: SessionCode,
    config: InferenceConfig,
    clock: SharedClock,
    shared: Arc<Shared>,
    polling: watch::Sender<bool>,
    seen: RecentKeys,
    push_open: bool,
    push_delivered: bool,
    push_exhausted: bool,
    poll_supported: bool,
    fallback_elapsed: bool,
}

impl SyncDriver {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SyncEvent>) {
        let fallback = tokio::time::sleep(self.config.fallback_delay);
        tokio::pin!(fallback);
        let staleness = tokio::time::sleep(self.config.staleness_timeout);
        tokio::pin!(staleness);

        loop {
            let active = self.shared.state.borrow().active;

            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Inference sources for {} finished", self.code);
                        break;
                    };
                    if self.handle(event) {
                        staleness.as_mut().reset(Instant::now() + self.config.staleness_timeout);
                    }
                }
                _ = &mut fallback, if !self.fallback_elapsed => {
                    self.fallback_elapsed = true;
                    if !self.push_open && !self.push_delivered {
                        tracing::info!("No pushed inference within {:?}, falling back to polling", self.config.fallback_delay);
                        self.start_polling();
                    }
                }
                _ = &mut staleness, if active => {
                    tracing::warn!("No inference frame for {:?}, marking inactive", self.config.staleness_timeout);
                    self.shared.state.send_modify(|s| s.active = false);
                }
            }
        }
    }

    /// Apply one event. Returns `true` if a new frame was accepted.
    fn handle(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::PushConnecting => {
                self.shared.state.send_modify(|s| s.connection_attempts += 1);
            }
            SyncEvent::PushOpened => {
                self.push_open = true;
                self.shared.state.send_modify(|s| s.push_open = true);
            }
            SyncEvent::PushFrame(frame) => {
                self.push_delivered = true;
                self.stop_polling();
                return self.ingest(frame, TransportKind::Push);
            }
            SyncEvent::ServerError(message) => {
                self.shared.state.send_modify(|s| s.last_error = Some(message));
            }
            SyncEvent::PushClosed { code: Some(NORMAL_CLOSURE), reason } => {
                // The server ended the channel on purpose; push will not return
                self.push_lost(reason);
                self.abandon_push();
            }
            SyncEvent::PushFailed(reason) | SyncEvent::PushClosed { reason, .. } => {
                self.push_lost(reason);
                if self.fallback_elapsed {
                    self.start_polling();
                }
            }
            SyncEvent::PushExhausted => {
                self.push_open = false;
                self.abandon_push();
            }
            SyncEvent::Polled(Ok(Some(frame))) => {
                return self.ingest(frame, TransportKind::Poll);
            }
            SyncEvent::Polled(Ok(None)) => {
                tracing::trace!("No inference result yet for {}", self.code);
            }
            SyncEvent::Polled(Err(InferenceError::Unsupported)) => {
                tracing::warn!("Inference polling not supported by the server");
                self.poll_supported = false;
                self.stop_polling();
                self.shared.state.send_modify(|s| s.active = false);
                if self.push_exhausted {
                    self.give_up();
                }
            }
            SyncEvent::Polled(Err(e)) => {
                tracing::warn!("Inference poll failed: {}", e);
            }
        }
        false
    }

    fn ingest(&mut self, frame: InferenceFrame, via: TransportKind) -> bool {
        if let Some(other) = frame.session_code.as_ref().filter(|c| **c != self.code) {
            tracing::warn!("Dropping inference frame for session {} (expected {})", other, self.code);
            return false;
        }

        if !self.seen.insert(frame.timestamp) {
            tracing::debug!("Duplicate inference frame ts={} via {}", frame.timestamp, via);
            return false;
        }

        let now = self.clock.now_ms();
        self.shared.performance.lock().record(&frame, now);
        if let Some(entry) = HistoryEntry::from_frame(&self.code, &frame) {
            self.shared.history.push(entry);
        }

        self.shared.state.send_modify(|s| {
            s.active = true;
            s.transport = via;
            s.last_update_ms = Some(now);
        });
        true
    }

    fn push_lost(&mut self, reason: String) {
        self.push_open = false;
        self.shared.state.send_modify(|s| {
            s.push_open = false;
            s.last_error = Some(reason);
        });
    }

    /// Push is gone for good: poll if the server allows it, else give up
    fn abandon_push(&mut self) {
        self.push_exhausted = true;
        if self.poll_supported {
            tracing::info!("Push abandoned, polling is now the only transport");
            self.start_polling();
        } else {
            self.give_up();
        }
    }

    fn start_polling(&mut self) {
        if !self.poll_supported || *self.polling.borrow() {
            return;
        }
        tracing::info!("Inference polling started for session {}", self.code);
        self.polling.send_replace(true);
        self.shared.state.send_modify(|s| s.polling = true);
    }

    fn stop_polling(&mut self) {
        if !*self.polling.borrow() {
            return;
        }
        tracing::info!("Inference polling stopped for session {}", self.code);
        self.polling.send_replace(false);
        self.shared.state.send_modify(|s| s.polling = false);
    }

    fn give_up(&self) {
        let err = InferenceError::Synchronization(
            "push channel exhausted and polling unsupported".to_string(),
        );
        tracing::error!("{}", err);
        self.shared.state.send_modify(|s| {
            s.active = false;
            s.last_error = Some(err.to_string());
        });
    }
}
