//! Inference push channel
//!
//! Keeps a duplex connection to `{ws_url}/{code}` open for as long as the
//! synchronizer is active. An abnormal close schedules a reconnection with
//! exponential backoff; a normal close (code 1000) ends the channel. Once
//! the reconnection budget is spent the channel reports itself exhausted and
//! stops for good.

use crate::backoff::Reconnect;
use crate::synchronizer::SyncEvent;
use liveview_common::{DuplexConnector, DuplexLink, LinkCommand, LinkEvent, NORMAL_CLOSURE};
use liveview_values::{InferenceMessage, InferenceRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// How a connected link ended
#[derive(Debug)]
enum LinkExit {
    /// Server closed with 1000
    Normal,
    /// Anything else; reconnect
    Abnormal { code: Option<u16>, reason: String },
    /// The synchronizer is gone
    OwnerGone,
}

pub(crate) struct PushChannel {
    url: String,
    connector: Arc<dyn DuplexConnector>,
    keepalive: Duration,
    reconnect: Reconnect,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl PushChannel {
    pub(crate) fn new(
        url: String,
        connector: Arc<dyn DuplexConnector>,
        keepalive: Duration,
        reconnect: Reconnect,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            url,
            connector,
            keepalive,
            reconnect,
            events,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.events.send(SyncEvent::PushConnecting).is_err() {
                return;
            }

            match self.connector.connect(&self.url).await {
                Ok(link) => {
                    tracing::info!("Inference push channel open: {}", self.url);
                    self.reconnect.reset();
                    if self.events.send(SyncEvent::PushOpened).is_err() {
                        return;
                    }

                    match self.pump(link).await {
                        LinkExit::Normal => {
                            tracing::info!("Inference push channel closed by server");
                            let _ = self.events.send(SyncEvent::PushClosed {
                                code: Some(NORMAL_CLOSURE),
                                reason: "normal closure".to_string(),
                            });
                            return;
                        }
                        LinkExit::Abnormal { code, reason } => {
                            tracing::warn!(
                                "Inference push channel lost (code {:?}): {}",
                                code,
                                reason
                            );
                            if self.events.send(SyncEvent::PushClosed { code, reason }).is_err() {
                                return;
                            }
                        }
                        LinkExit::OwnerGone => return,
                    }
                }
                Err(e) => {
                    tracing::warn!("Inference push connect failed: {}", e);
                    if self.events.send(SyncEvent::PushFailed(e.to_string())).is_err() {
                        return;
                    }
                }
            }

            let Some(delay) = self.reconnect.next_delay() else {
                tracing::error!(
                    "Inference push channel abandoned after {} reconnection attempts",
                    self.reconnect.max_attempts
                );
                let _ = self.events.send(SyncEvent::PushExhausted);
                return;
            };

            tracing::info!(
                "Reconnecting inference push channel in {:?} (attempt {}/{})",
                delay,
                self.reconnect.attempt,
                self.reconnect.max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn pump(&self, link: DuplexLink) -> LinkExit {
        let DuplexLink {
            outbound,
            mut inbound,
        } = link;

        let mut keepalive = interval_at(Instant::now() + self.keepalive, self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = inbound.recv() => {
                    let Some(event) = event else {
                        return LinkExit::Abnormal {
                            code: None,
                            reason: "transport dropped".to_string(),
                        };
                    };

                    let abnormal = event.is_abnormal_close();
                    match event {
                        LinkEvent::Text(text) => {
                            if !self.dispatch(&text) {
                                return LinkExit::OwnerGone;
                            }
                        }
                        LinkEvent::Error(reason) => {
                            tracing::warn!("Inference push transport error: {}", reason);
                        }
                        LinkEvent::Closed { code, reason } => {
                            return if abnormal {
                                LinkExit::Abnormal { code, reason }
                            } else {
                                LinkExit::Normal
                            };
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if outbound.send(LinkCommand::Text(InferenceRequest::Ping.to_wire())).is_err() {
                        tracing::debug!("Inference push transport gone, skipping keep-alive");
                    }
                }
            }
        }
    }

    /// Decode and forward one frame. Returns `false` once the owner is gone.
    fn dispatch(&self, text: &str) -> bool {
        let message = match InferenceMessage::from_wire(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed inference message: {}", e);
                return true;
            }
        };

        match message {
            InferenceMessage::InferenceUpdate { data } => {
                tracing::debug!("← inference_update ts={}", data.timestamp);
                self.events.send(SyncEvent::PushFrame(data)).is_ok()
            }
            InferenceMessage::Pong => {
                tracing::trace!("← pong");
                true
            }
            InferenceMessage::NoData => {
                tracing::debug!("← no_data");
                true
            }
            InferenceMessage::Error { message } => {
                tracing::warn!("Inference server error: {}", message);
                self.events.send(SyncEvent::ServerError(message)).is_ok()
            }
        }
    }
}
