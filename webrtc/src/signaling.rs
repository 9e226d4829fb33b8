//! Signaling channel
//!
//! One duplex text channel per session code. Outbound messages are stamped
//! with the session code and a client timestamp; inbound frames are decoded
//! once, here, and delivered as [`SignalingEvent`]s in arrival order.
//! Frames that fail to decode are dropped with a warning.

use crate::config::WebRtcConfig;
use crate::error::WebRtcResult;
use liveview_common::{DuplexConnector, LinkCommand, LinkEvent, SharedClock, TaskScope};
use liveview_values::{SessionCode, SignalingMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Event delivered by the signaling channel
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Decoded inbound message
    Message(SignalingMessage),

    /// Channel closed; `code` is `None` when the transport dropped without a close frame
    Closed { code: Option<u16>, reason: String },

    /// Transport error; a `Closed` event follows
    Error(String),
}

/// Open signaling channel for one session
#[derive(Debug)]
pub struct SignalingChannel {
    code: SessionCode,
    clock: SharedClock,
    /// `None` once closed
    outbound: Mutex<Option<mpsc::UnboundedSender<LinkCommand>>>,
}

impl SignalingChannel {
    /// Open the channel for `code`.
    ///
    /// The reader and keep-alive run as one task registered in `scope`.
    pub async fn open(
        connector: &dyn DuplexConnector,
        config: &WebRtcConfig,
        code: &SessionCode,
        clock: SharedClock,
        scope: &TaskScope,
    ) -> WebRtcResult<(Arc<Self>, mpsc::UnboundedReceiver<SignalingEvent>)> {
        let url = config.signaling_endpoint(code.as_str());
        let link = connector.connect(&url).await?;

        tracing::info!("Signaling channel open for session {}", code);

        let channel = Arc::new(Self {
            code: code.clone(),
            clock,
            outbound: Mutex::new(Some(link.outbound)),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        scope.spawn(pump(channel.clone(), link.inbound, events_tx, config.keepalive_interval));

        Ok((channel, events_rx))
    }

    /// Session code this channel serves
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// Whether the channel is still open
    pub fn is_open(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Send a message. A logged no-op when the channel is not open.
    pub fn send(&self, message: SignalingMessage) {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            tracing::debug!("Signaling channel closed, dropping outbound {}", message.kind());
            return;
        };

        let wire = match message.to_wire(&self.code, self.clock.now_ms()) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };

        tracing::debug!("→ {}", message.kind());
        if tx.send(LinkCommand::Text(wire)).is_err() {
            tracing::debug!("Signaling transport gone, dropping outbound {}", message.kind());
        }
    }

    /// Close the channel. Idempotent.
    pub fn close(&self, code: u16, reason: &str) {
        if let Some(tx) = self.outbound.lock().take() {
            tracing::info!("Closing signaling channel for session {} ({})", self.code, reason);
            let _ = tx.send(LinkCommand::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn mark_closed(&self) {
        self.outbound.lock().take();
    }
}

async fn pump(
    channel: Arc<SignalingChannel>,
    mut inbound: mpsc::UnboundedReceiver<LinkEvent>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    keepalive: std::time::Duration,
) {
    let mut keepalive = interval_at(Instant::now() + keepalive, keepalive);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = inbound.recv() => {
                let Some(event) = event else {
                    channel.mark_closed();
                    let _ = events.send(SignalingEvent::Closed {
                        code: None,
                        reason: "transport dropped".to_string(),
                    });
                    return;
                };

                let forwarded = match event {
                    LinkEvent::Text(text) => match SignalingMessage::from_wire(&text) {
                        Ok(message) => {
                            tracing::debug!("← {}", message.kind());
                            SignalingEvent::Message(message)
                        }
                        Err(e) => {
                            tracing::warn!("Dropping malformed signaling message: {}", e);
                            continue;
                        }
                    },
                    LinkEvent::Error(reason) => SignalingEvent::Error(reason),
                    LinkEvent::Closed { code, reason } => {
                        channel.mark_closed();
                        let _ = events.send(SignalingEvent::Closed { code, reason });
                        return;
                    }
                };

                if events.send(forwarded).is_err() {
                    return;
                }
            }
            _ = keepalive.tick() => {
                // A missing pong is not a failure signal
                channel.send(SignalingMessage::Ping { ts: channel.clock.now_ms() });
            }
        }
    }
}
