//! Viewer controller.
//!
//! Connects the media session, waits for the stream to go live, starts
//! inference synchronization and feeds every history revision into the
//! deployment tracker until shutdown or a terminal session failure.

use crate::config::{ConnectMode, ViewerConfig};
use crate::error::{ViewerError, ViewerResult};
use liveview_deployments::DeploymentTracker;
use liveview_inference::{InferenceSynchronizer, SyncState};
use liveview_values::{
    ConnectionStatus, DeploymentEvent, DeploymentStats, LatencyReport, PerformanceStats,
    SessionCode,
};
use liveview_webrtc::ViewerSession;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Snapshot logged on every status tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ConnectionStatus,
    /// Video frames received by the current transport
    pub frames_received: u64,
    pub latency: LatencyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference: Option<SyncState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceStats>,
    pub deployments: DeploymentStats,
}

pub struct LiveViewer {
    config: ViewerConfig,
    session: ViewerSession,
    sync: Option<InferenceSynchronizer>,
    deployments: Mutex<DeploymentTracker>,
}

impl LiveViewer {
    /// Controller over explicit collaborators; `sync: None` skips inference
    pub fn new(
        config: ViewerConfig,
        session: ViewerSession,
        sync: Option<InferenceSynchronizer>,
    ) -> Self {
        let deployments = Mutex::new(DeploymentTracker::new(config.clustering.clone()));
        Self {
            config,
            session,
            sync,
            deployments,
        }
    }

    /// Controller backed by the real network stack
    pub fn from_config(config: ViewerConfig) -> ViewerResult<Self> {
        config
            .validate()
            .map_err(|e| ViewerError::Config(format!("{:#}", e)))?;

        let session = ViewerSession::from_config(config.webrtc())?;
        let sync = if config.inference {
            Some(InferenceSynchronizer::from_config(config.inference_settings())?)
        } else {
            None
        };
        Ok(Self::new(config, session, sync))
    }

    /// Connect, synchronize and report until `shutdown` resolves or the
    /// session fails. Everything is stopped before returning.
    pub async fn run<F>(&self, code: SessionCode, shutdown: F) -> ViewerResult<()>
    where
        F: Future<Output = ()>,
    {
        self.connect(code.clone()).await?;

        let outcome = match self.start_inference(code).await {
            Ok(()) => self.supervise(shutdown).await,
            Err(e) => Err(e),
        };

        self.shutdown().await;
        outcome
    }

    /// Connect per the configured mode and wait for `Live`.
    ///
    /// On timeout or failure the session is disconnected before returning.
    pub async fn connect(&self, code: SessionCode) -> ViewerResult<()> {
        tracing::info!("Joining session {} ({:?} mode)", code, self.config.mode);
        match self.config.mode {
            ConnectMode::Signaling => self.session.connect(code).await?,
            ConnectMode::Direct => self.session.connect_direct(code).await?,
        }

        let limit = self.config.connect_timeout();
        let mut status = self.session.subscribe_status();
        let reached = tokio::time::timeout(
            limit,
            status.wait_for(|s| matches!(s, ConnectionStatus::Live | ConnectionStatus::Failed)),
        )
        .await
        .map(|r| r.map(|s| *s));

        match reached {
            Ok(Ok(ConnectionStatus::Live)) => {
                tracing::info!("Stream is live");
                Ok(())
            }
            Ok(_) => {
                let err = ViewerError::SessionFailed(self.failure_message());
                self.session.disconnect().await;
                Err(err)
            }
            Err(_) => {
                tracing::error!("Stream did not go live within {:?}", limit);
                self.session.disconnect().await;
                Err(ViewerError::ConnectTimeout(limit))
            }
        }
    }

    async fn start_inference(&self, code: SessionCode) -> ViewerResult<()> {
        let Some(sync) = &self.sync else {
            tracing::info!("Inference synchronization disabled");
            return Ok(());
        };

        if self.config.enable_inference {
            if sync.enable_and_start(code).await? {
                tracing::info!("Inference enabled on the server");
            }
        } else {
            sync.start(code).await;
        }
        Ok(())
    }

    async fn supervise<F>(&self, shutdown: F) -> ViewerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut status = self.session.subscribe_status();
        // A failure before subscribing must still be observed
        status.mark_changed();
        let mut stream = self.session.subscribe_stream();
        let mut revisions = self.sync.as_ref().map(|s| s.history().subscribe());

        let period = self.config.status_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Clusters settle with time even when no new frame arrives
        let window = Duration::from_millis(self.config.clustering.time_window_ms);
        let mut settle = interval_at(Instant::now() + window, window);
        settle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let current = *status.borrow_and_update();
                    match current {
                        ConnectionStatus::Failed => {
                            return Err(ViewerError::SessionFailed(self.failure_message()));
                        }
                        ConnectionStatus::Disconnected => {
                            tracing::warn!("Stream lost, waiting for the broadcaster");
                        }
                        other => tracing::debug!("Session status: {}", other),
                    }
                }
                changed = stream.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    if let Some(bound) = stream.borrow_and_update().as_ref() {
                        tracing::info!(
                            "Bound inbound {:?} track {} ({})",
                            bound.kind,
                            bound.track_id,
                            bound.codec
                        );
                    }
                }
                alive = next_revision(&mut revisions) => {
                    if alive {
                        self.absorb_history();
                    } else {
                        revisions = None;
                    }
                }
                _ = settle.tick() => self.absorb_history(),
                _ = ticker.tick() => {
                    let report = self.status_report();
                    log_report(&report);
                }
            }
        }
    }

    /// Cluster the current history and log any deployments that have settled
    fn absorb_history(&self) {
        let Some(sync) = &self.sync else {
            return;
        };
        let entries = sync.history().snapshot();
        let events = self.deployments.lock().ingest(&entries, wall_clock_ms());
        for event in &events {
            tracing::info!(
                "Deployment {}: {} at ({:.0}, {:.0}), {} detections over {} ms",
                event.id,
                event.troop_types.join("+"),
                event.center_x,
                event.center_y,
                event.detection_count,
                event.duration_ms
            );
        }
    }

    /// Stop inference, then disconnect the media session. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(sync) = &self.sync {
            sync.stop().await;
        }
        self.session.disconnect().await;
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.session.status(),
            frames_received: self
                .session
                .transport_stats()
                .map(|s| s.frames())
                .unwrap_or_default(),
            latency: self.session.latency(),
            inference: self.sync.as_ref().map(|s| s.state()),
            performance: self.sync.as_ref().map(|s| s.performance()),
            deployments: self.deployment_stats(),
        }
    }

    pub fn session(&self) -> &ViewerSession {
        &self.session
    }

    pub fn synchronizer(&self) -> Option<&InferenceSynchronizer> {
        self.sync.as_ref()
    }

    /// All deployments detected so far, oldest first
    pub fn deployments(&self) -> Vec<DeploymentEvent> {
        self.deployments.lock().events().to_vec()
    }

    pub fn deployment_stats(&self) -> DeploymentStats {
        self.deployments.lock().stats(wall_clock_ms())
    }

    fn failure_message(&self) -> String {
        self.session
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "connection failed".to_string())
    }
}

/// Resolves on the next history revision; `false` once the store is gone.
async fn next_revision(revisions: &mut Option<watch::Receiver<u64>>) -> bool {
    match revisions {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

fn log_report(report: &StatusReport) {
    tracing::info!(
        "Status: {} | {} frames | latency {:.0} ms (avg {:.0}, {} samples)",
        report.status,
        report.frames_received,
        report.latency.current,
        report.latency.average,
        report.latency.sample_count
    );
    if let (Some(state), Some(perf)) = (&report.inference, &report.performance) {
        tracing::info!(
            "Inference: active={} via {} | {:.1} fps, {:.1} det/s, {:.0}% frames with detections, {:.1} ms avg",
            state.active,
            state.transport,
            perf.inference_fps,
            perf.detections_per_second,
            perf.accuracy_pct,
            perf.avg_inference_time_ms
        );
        if let Some(ref err) = state.last_error {
            tracing::warn!("Inference: {}", err);
        }
    }
    tracing::info!(
        "Deployments: {} total, {} in the last minute{}",
        report.deployments.total,
        report.deployments.per_minute,
        report
            .deployments
            .most_common_troop
            .as_ref()
            .map(|t| format!(", mostly {}", t))
            .unwrap_or_default()
    );
}

/// Producer timestamps are wall-clock milliseconds
fn wall_clock_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
