//! Shared plumbing for the LiveView crates.
//!
//! This crate sits at the bottom of the dependency hierarchy and holds the
//! pieces every channel needs regardless of what it carries:
//!
//! - [`duplex`]: message-passing duplex text transport (WebSocket or in-memory)
//! - [`clock`]: millisecond clocks used for probes, staleness and sampling
//! - [`tasks`]: scoped task tracking so every timer started on activation is
//!   cancelled together
//! - [`logging`]: `tracing` subscriber setup shared by binaries

pub mod clock;
pub mod duplex;
pub mod logging;
pub mod tasks;

pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use duplex::{
    DuplexConnector, DuplexError, DuplexLink, LinkCommand, LinkEvent, MemoryConnector, MemoryPeer,
    WebSocketConnector, NORMAL_CLOSURE,
};
pub use logging::{init_tracing, LogFormat, LoggingError, DEFAULT_LOG_FILTER};
pub use tasks::TaskScope;
