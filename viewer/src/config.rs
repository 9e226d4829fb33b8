//! Configuration system for the LiveView viewer.
//!
//! Supports:
//! - CLI arguments (highest priority)
//! - Environment variables
//! - TOML config file
//! - Defaults (lowest priority)

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use liveview_common::LogFormat;
use liveview_deployments::ClusterConfig;
use liveview_inference::InferenceConfig;
use liveview_webrtc::WebRtcConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments for the viewer.
#[derive(Parser, Debug, Clone)]
#[command(name = "liveview")]
#[command(about = "LiveView - headless viewer for live broadcasts with inference overlays")]
#[command(version)]
pub struct CliArgs {
    /// Four-digit session code to join
    #[arg(env = "LIVEVIEW_SESSION_CODE")]
    pub code: String,

    /// How the media connection is negotiated
    #[arg(long, short = 'm', env = "LIVEVIEW_MODE")]
    pub mode: Option<ConnectMode>,

    /// Configuration file path
    #[arg(long, short = 'c', default_value = "liveview.toml", env = "LIVEVIEW_CONFIG")]
    pub config: PathBuf,

    /// Signaling channel base URL
    #[arg(long, env = "LIVEVIEW_SIGNALING_URL")]
    pub signaling_url: Option<String>,

    /// Offer endpoint for direct mode
    #[arg(long, env = "LIVEVIEW_OFFER_URL")]
    pub offer_url: Option<String>,

    /// Inference push channel base URL
    #[arg(long, env = "LIVEVIEW_INFERENCE_WS_URL")]
    pub inference_ws_url: Option<String>,

    /// Latest-frame REST endpoint
    #[arg(long, env = "LIVEVIEW_INFERENCE_HTTP_URL")]
    pub inference_http_url: Option<String>,

    /// Ask the server to turn inference on before synchronizing
    #[arg(long, env = "LIVEVIEW_ENABLE_INFERENCE")]
    pub enable_inference: bool,

    /// Do not synchronize inference results at all
    #[arg(long)]
    pub no_inference: bool,

    /// Seconds to wait for the stream to go live
    #[arg(long, env = "LIVEVIEW_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// Seconds between status reports
    #[arg(long, env = "LIVEVIEW_STATUS_INTERVAL_SECS")]
    pub status_interval_secs: Option<u64>,

    /// Log filter directives (falls back to RUST_LOG)
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Log output format: pretty or json
    #[arg(long, env = "LIVEVIEW_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Media negotiation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Offer/answer over the signaling channel
    #[default]
    Signaling,
    /// Offer posted to the HTTP offer endpoint, no signaling channel
    Direct,
}

/// Endpoint overrides; unset fields keep the library defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub signaling_url: Option<String>,
    pub offer_url: Option<String>,
    pub stun_servers: Option<Vec<String>>,
    pub inference_ws_url: Option<String>,
    pub inference_http_url: Option<String>,
    pub toggle_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives; `None` uses RUST_LOG or the built-in default
    pub filter: Option<String>,
    pub format: LogFormat,
}

/// Full viewer configuration (merged from all sources).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub mode: ConnectMode,

    /// Synchronize inference results once live
    pub inference: bool,

    /// Enable inference through the toggle endpoint first
    pub enable_inference: bool,

    pub connect_timeout_secs: u64,
    pub status_interval_secs: u64,

    pub endpoints: EndpointConfig,
    pub logging: LoggingConfig,
    pub clustering: ClusterConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            mode: ConnectMode::Signaling,
            inference: true,
            enable_inference: false,
            connect_timeout_secs: 15,
            status_interval_secs: 10,
            endpoints: EndpointConfig::default(),
            logging: LoggingConfig::default(),
            clustering: ClusterConfig::default(),
        }
    }
}

impl ViewerConfig {
    /// Load configuration from CLI args and optional config file.
    ///
    /// Priority: CLI args > Environment > Config file > Defaults
    pub fn load(args: &CliArgs) -> Result<Self> {
        let mut config = if args.config.exists() {
            Self::from_file(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?
        } else {
            Self::default()
        };

        if let Some(mode) = args.mode {
            config.mode = mode;
        }
        if let Some(ref url) = args.signaling_url {
            config.endpoints.signaling_url = Some(url.clone());
        }
        if let Some(ref url) = args.offer_url {
            config.endpoints.offer_url = Some(url.clone());
        }
        if let Some(ref url) = args.inference_ws_url {
            config.endpoints.inference_ws_url = Some(url.clone());
        }
        if let Some(ref url) = args.inference_http_url {
            config.endpoints.inference_http_url = Some(url.clone());
        }
        if args.enable_inference {
            config.enable_inference = true;
        }
        if args.no_inference {
            config.inference = false;
        }
        if let Some(secs) = args.connect_timeout_secs {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = args.status_interval_secs {
            config.status_interval_secs = secs;
        }
        if let Some(ref filter) = args.log_filter {
            config.logging.filter = Some(filter.clone());
        }
        if let Some(format) = args.log_format {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ViewerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be > 0");
        }
        if self.status_interval_secs == 0 {
            anyhow::bail!("status_interval_secs must be > 0");
        }
        self.clustering.validate().context("Invalid clustering thresholds")?;
        self.webrtc().validate().context("Invalid media session settings")?;
        self.inference_settings()
            .validate()
            .context("Invalid inference settings")?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Media session settings: environment, then endpoint overrides
    pub fn webrtc(&self) -> WebRtcConfig {
        let mut config = WebRtcConfig::from_env();
        if let Some(ref url) = self.endpoints.signaling_url {
            config.signaling_url = url.clone();
        }
        if let Some(ref url) = self.endpoints.offer_url {
            config.offer_url = url.clone();
        }
        if let Some(ref servers) = self.endpoints.stun_servers {
            config.stun_servers = servers.clone();
        }
        config
    }

    /// Synchronizer settings: environment, then endpoint overrides
    pub fn inference_settings(&self) -> InferenceConfig {
        let mut config = InferenceConfig::from_env();
        if let Some(ref url) = self.endpoints.inference_ws_url {
            config.ws_url = url.clone();
        }
        if let Some(ref url) = self.endpoints.inference_http_url {
            config.http_url = url.clone();
        }
        if let Some(ref url) = self.endpoints.toggle_url {
            config.toggle_url = url.clone();
        }
        config
    }
}
