//! Configuration types for the viewer media session

use crate::error::{WebRtcError, WebRtcResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a viewer media session
///
/// Endpoints, STUN servers and the timers that drive keep-alive, stats
/// sampling and latency probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// Base URL of the signaling channel; the session code is appended
    pub signaling_url: String,

    /// URL of the non-multiplexed offer endpoint
    pub offer_url: String,

    /// STUN server URLs (no TURN)
    pub stun_servers: Vec<String>,

    /// Keep-alive ping interval on the signaling channel
    pub keepalive_interval: Duration,

    /// Transport stats poll interval
    pub stats_interval: Duration,

    /// Latency probe interval
    pub probe_interval: Duration,

    /// Assumed encode delay used when no packet timestamp is available (ms)
    pub encoding_delay_ms: u64,

    /// Timeout for HTTP requests
    pub http_timeout: Duration,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws/signal".to_string(),
            offer_url: "http://localhost:8080/api/webrtc/offer".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            keepalive_interval: Duration::from_secs(25),
            stats_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(5),
            encoding_delay_ms: 30,
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl WebRtcConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LIVEVIEW_SIGNALING_URL") {
            config.signaling_url = url;
        }

        if let Ok(url) = std::env::var("LIVEVIEW_OFFER_URL") {
            config.offer_url = url;
        }

        if let Ok(servers) = std::env::var("LIVEVIEW_STUN_SERVERS") {
            config.stun_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(timeout_ms) = std::env::var("LIVEVIEW_HTTP_TIMEOUT_MS") {
            if let Ok(val) = timeout_ms.parse() {
                config.http_timeout = Duration::from_millis(val);
            }
        }

        config
    }

    /// URL of the signaling channel for one session
    pub fn signaling_endpoint(&self, code: &str) -> String {
        format!("{}/{}", self.signaling_url.trim_end_matches('/'), code)
    }

    /// Validate configuration
    pub fn validate(&self) -> WebRtcResult<()> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(WebRtcError::Config(format!(
                "signaling_url must be a ws:// or wss:// URL, got '{}'",
                self.signaling_url
            )));
        }

        if !(self.offer_url.starts_with("http://") || self.offer_url.starts_with("https://")) {
            return Err(WebRtcError::Config(format!(
                "offer_url must be an http:// or https:// URL, got '{}'",
                self.offer_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(WebRtcError::Config("At least one STUN server is required".to_string()));
        }

        if let Some(bad) = self.stun_servers.iter().find(|s| !s.starts_with("stun:")) {
            return Err(WebRtcError::Config(format!("Only STUN servers are supported, got '{}'", bad)));
        }

        for (name, value) in [
            ("keepalive_interval", self.keepalive_interval),
            ("stats_interval", self.stats_interval),
            ("probe_interval", self.probe_interval),
            ("http_timeout", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(WebRtcError::Config(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WebRtcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keepalive_interval, Duration::from_secs(25));
        assert_eq!(config.encoding_delay_ms, 30);
    }

    #[test]
    fn test_turn_server_rejected() {
        let config = WebRtcConfig {
            stun_servers: vec!["turn:relay.example.com:3478".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signaling_endpoint() {
        let config = WebRtcConfig {
            signaling_url: "wss://live.example.com/signal/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.signaling_endpoint("4821"), "wss://live.example.com/signal/4821");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = WebRtcConfig {
            stats_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stats_interval"));
    }
}
