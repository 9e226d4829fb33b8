//! LiveView WebRTC Crate
//!
//! Viewer side of a live broadcast: joins a session by code, negotiates the
//! media transport and measures latency.
//!
//! # Architecture
//!
//! - [`SignalingChannel`]: duplex channel per session code carrying
//!   connect/offer/answer/ICE/ping messages
//! - [`ViewerSession`]: state machine owning the signaling channel and the
//!   peer media connection (`Idle → Connecting → Live → ...`)
//! - [`LatencyEstimator`]: end-to-end, network and signaling latency figures
//! - [`MediaTransport`] / [`MediaTransportFactory`]: transport seam with a
//!   `webrtc`-crate implementation ([`PeerConnectionHandler`])
//! - [`HttpOfferClient`]: offer/answer over HTTP for the non-multiplexed mode
//!
//! # Usage
//!
//! ```rust,no_run
//! use liveview_values::SessionCode;
//! use liveview_webrtc::{ViewerSession, WebRtcConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ViewerSession::from_config(WebRtcConfig::from_env())?;
//!
//!     session.connect(SessionCode::parse("4821")?).await?;
//!     let mut status = session.subscribe_status();
//!     status.wait_for(|s| *s == liveview_values::ConnectionStatus::Live).await?;
//!
//!     println!("latency: {:?}", session.latency());
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod error;
mod http_signaling;
mod latency;
mod peer_connection;
mod session;
mod signaling;
pub mod traits;
mod types;

// Re-exports
pub use config::WebRtcConfig;
pub use error::{WebRtcError, WebRtcResult};
pub use http_signaling::HttpOfferClient;
pub use latency::{LatencyEstimator, MAX_PLAUSIBLE_MS, ROLLING_WINDOW, SAMPLE_CAPACITY};
pub use peer_connection::{PeerConnectionFactory, PeerConnectionHandler};
pub use session::{SessionBackends, ViewerSession};
pub use signaling::{SignalingChannel, SignalingEvent};
pub use traits::{MediaTransport, MediaTransportFactory, OfferExchange};
pub use types::{IceState, InboundStream, MediaEvent, MediaEventSender, MediaKind, TransportStats};
