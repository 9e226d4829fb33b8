//! Duplex text transport.
//!
//! Signaling and inference push channels both need the same thing from the
//! network: a bidirectional stream of text frames plus a close/error signal.
//! A [`DuplexConnector`] opens such a stream and hands back a [`DuplexLink`],
//! a pair of channels:
//!
//! ```text
//!  owner ── LinkCommand ──▶ writer pump ──▶ socket
//!  owner ◀── LinkEvent ──── reader pump ◀── socket
//! ```
//!
//! Owners never touch the socket. Dropping the command sender closes the
//! socket; the pumps exit once both sides are gone.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// WebSocket close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Command from the owner to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Send a text frame
    Text(String),

    /// Close the connection
    Close { code: u16, reason: String },
}

/// Event from the transport to the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Text frame received
    Text(String),

    /// Connection closed; `code` is `None` when no close frame was received
    Closed { code: Option<u16>, reason: String },

    /// Transport-level error; a `Closed` event follows
    Error(String),
}

impl LinkEvent {
    /// Whether this is a close other than [`NORMAL_CLOSURE`].
    pub fn is_abnormal_close(&self) -> bool {
        matches!(self, Self::Closed { code, .. } if *code != Some(NORMAL_CLOSURE))
    }
}

/// An open duplex connection.
#[derive(Debug)]
pub struct DuplexLink {
    /// Commands to the transport
    pub outbound: mpsc::UnboundedSender<LinkCommand>,

    /// Events from the transport, in arrival order
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Failure to establish a duplex connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DuplexError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// Opens duplex connections.
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<DuplexLink, DuplexError>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<DuplexLink, DuplexError> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| DuplexError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        tracing::debug!("WebSocket connected: {}", url);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut commands) = mpsc::unbounded_channel::<LinkCommand>();
        let (events, inbound) = mpsc::unbounded_channel::<LinkEvent>();

        // Writer pump: ends on an explicit close or when the owner drops the sender
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    LinkCommand::Text(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            tracing::debug!("WebSocket send failed: {}", e);
                            return;
                        }
                    }
                    LinkCommand::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        // Reader pump: ends when the socket closes or the owner stops listening
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = events.closed() => return,
                    next = source.next() => next,
                };

                let event = match next {
                    Some(Ok(Message::Text(text))) => LinkEvent::Text(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => LinkEvent::Text(text),
                        Err(_) => {
                            tracing::warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len());
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::new()),
                        };
                        let _ = events.send(LinkEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(LinkEvent::Error(e.to_string()));
                        let _ = events.send(LinkEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        });
                        return;
                    }
                    None => {
                        let _ = events.send(LinkEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                };

                if events.send(event).is_err() {
                    return;
                }
            }
        });

        Ok(DuplexLink { outbound, inbound })
    }
}

/// Server side of an in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    /// URL the client connected to
    pub url: String,

    from_client: mpsc::UnboundedReceiver<LinkCommand>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl MemoryPeer {
    /// Deliver a text frame to the client. Returns `false` once the client is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(LinkEvent::Text(text.into())).is_ok()
    }

    /// Report a transport error followed by an abnormal close.
    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Error(reason.to_string()));
        let _ = self.to_client.send(LinkEvent::Closed {
            code: None,
            reason: reason.to_string(),
        });
    }

    /// Close the link with a close code.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Wait for the next command from the client.
    pub async fn recv(&mut self) -> Option<LinkCommand> {
        self.from_client.recv().await
    }

    /// Take every command already sent by the client.
    pub fn drain(&mut self) -> Vec<LinkCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.from_client.try_recv() {
            commands.push(command);
        }
        commands
    }

    /// Take every text frame already sent by the client.
    pub fn drain_texts(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|command| match command {
                LinkCommand::Text(text) => Some(text),
                LinkCommand::Close { .. } => None,
            })
            .collect()
    }
}

/// In-process transport; each accepted connection is handed out as a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Mutex<VecDeque<String>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Create a connector and the receiver on which new peers appear.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refusals: Mutex::new(VecDeque::new()),
                attempts: AtomicUsize::new(0),
            },
            accepted,
        )
    }

    /// Make the next connection attempt fail with `reason`.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.refusals.lock().push_back(reason.into());
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<DuplexLink, DuplexError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.refusals.lock().pop_front() {
            return Err(DuplexError::Connect {
                url: url.to_string(),
                reason,
            });
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            from_client,
            to_client,
        };
        self.peers.send(peer).map_err(|_| DuplexError::Connect {
            url: url.to_string(),
            reason: "no listener".to_string(),
        })?;

        Ok(DuplexLink { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_link_round_trip() {
        let (connector, mut accepted) = MemoryConnector::new();
        let mut link = connector.connect("mem://signal/4821").await.unwrap();
        let mut peer = accepted.recv().await.unwrap();

        assert_eq!(peer.url, "mem://signal/4821");

        link.outbound.send(LinkCommand::Text("hello".into())).unwrap();
        assert_eq!(peer.recv().await, Some(LinkCommand::Text("hello".into())));

        peer.send_text("world");
        assert_eq!(link.inbound.recv().await, Some(LinkEvent::Text("world".into())));
    }

    #[tokio::test]
    async fn test_memory_refusal() {
        let (connector, _accepted) = MemoryConnector::new();
        connector.refuse_next("offline");

        let err = connector.connect("mem://x").await.unwrap_err();
        assert!(err.to_string().contains("offline"));
        assert!(connector.connect("mem://x").await.is_ok());
        assert_eq!(connector.attempts(), 2);
    }

    #[test]
    fn test_abnormal_close() {
        let normal = LinkEvent::Closed { code: Some(NORMAL_CLOSURE), reason: String::new() };
        let dropped = LinkEvent::Closed { code: None, reason: String::new() };
        let going_away = LinkEvent::Closed { code: Some(1006), reason: String::new() };

        assert!(!normal.is_abnormal_close());
        assert!(dropped.is_abnormal_close());
        assert!(going_away.is_abnormal_close());
        assert!(!LinkEvent::Text("x".into()).is_abnormal_close());
    }
}
