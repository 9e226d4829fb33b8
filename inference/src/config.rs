//! Configuration for the inference synchronizer

use crate::error::{InferenceError, InferenceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints, timers and buffer sizes of the inference synchronizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the push channel; the session code is appended
    pub ws_url: String,

    /// Base URL of the latest-frame REST endpoint; the session code is appended
    pub http_url: String,

    /// Base URL of the toggle endpoint; the session code is appended
    pub toggle_url: String,

    /// Wait for a pushed frame before falling back to polling
    pub fallback_delay: Duration,

    /// Poll interval once polling is active
    pub poll_interval: Duration,

    /// No frame for this long marks the synchronizer inactive
    pub staleness_timeout: Duration,

    /// Push reconnection attempts before the channel is abandoned
    pub max_reconnect_attempts: u32,

    /// First reconnection delay
    pub backoff_base: Duration,

    /// Upper bound on any reconnection delay
    pub backoff_cap: Duration,

    /// Entries kept in the detection history
    pub history_capacity: usize,

    /// Frames kept in the performance buffer
    pub stats_capacity: usize,

    /// Frame timestamps remembered for duplicate suppression
    pub dedupe_window: usize,

    /// Keep-alive ping interval on the push channel
    pub keepalive_interval: Duration,

    /// Timeout for HTTP requests
    pub http_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws/inference".to_string(),
            http_url: "http://localhost:8080/api/inference/latest".to_string(),
            toggle_url: "http://localhost:8080/api/inference/toggle".to_string(),
            fallback_delay: Duration::from_secs(3),
            poll_interval: Duration::from_millis(200),
            staleness_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(10_000),
            history_capacity: 50,
            stats_capacity: 200,
            dedupe_window: 256,
            keepalive_interval: Duration::from_secs(25),
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl InferenceConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LIVEVIEW_INFERENCE_WS_URL") {
            config.ws_url = url;
        }

        if let Ok(url) = std::env::var("LIVEVIEW_INFERENCE_HTTP_URL") {
            config.http_url = url;
        }

        if let Ok(url) = std::env::var("LIVEVIEW_INFERENCE_TOGGLE_URL") {
            config.toggle_url = url;
        }

        if let Ok(ms) = std::env::var("LIVEVIEW_POLL_INTERVAL_MS") {
            if let Ok(val) = ms.parse() {
                config.poll_interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout_ms) = std::env::var("LIVEVIEW_HTTP_TIMEOUT_MS") {
            if let Ok(val) = timeout_ms.parse() {
                config.http_timeout = Duration::from_millis(val);
            }
        }

        config
    }

    /// Push channel URL for one session
    pub fn push_endpoint(&self, code: &str) -> String {
        join(&self.ws_url, code)
    }

    /// Latest-frame URL for one session
    pub fn latest_endpoint(&self, code: &str) -> String {
        join(&self.http_url, code)
    }

    /// Toggle URL for one session
    pub fn toggle_endpoint(&self, code: &str) -> String {
        join(&self.toggle_url, code)
    }

    /// Validate configuration
    pub fn validate(&self) -> InferenceResult<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(InferenceError::Config(format!(
                "ws_url must be a ws:// or wss:// URL, got '{}'",
                self.ws_url
            )));
        }

        for (name, url) in [("http_url", &self.http_url), ("toggle_url", &self.toggle_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(InferenceError::Config(format!(
                    "{} must be an http:// or https:// URL, got '{}'",
                    name, url
                )));
            }
        }

        for (name, value) in [
            ("fallback_delay", self.fallback_delay),
            ("poll_interval", self.poll_interval),
            ("staleness_timeout", self.staleness_timeout),
            ("backoff_base", self.backoff_base),
            ("keepalive_interval", self.keepalive_interval),
            ("http_timeout", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(InferenceError::Config(format!("{} must be > 0", name)));
            }
        }

        if self.backoff_cap < self.backoff_base {
            return Err(InferenceError::Config(
                "backoff_cap must not be below backoff_base".to_string(),
            ));
        }

        for (name, value) in [
            ("history_capacity", self.history_capacity),
            ("stats_capacity", self.stats_capacity),
            ("dedupe_window", self.dedupe_window),
        ] {
            if value == 0 {
                return Err(InferenceError::Config(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }
}

fn join(base: &str, code: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), code)
}
