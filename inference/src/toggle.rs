//! Server-side inference switch

use crate::config::InferenceConfig;
use crate::error::{InferenceError, InferenceResult};
use async_trait::async_trait;
use liveview_values::{InferenceToggle, InferenceToggleResponse, SessionCode};

/// Turns inference on or off for a session
#[async_trait]
pub trait InferenceSwitch: Send + Sync {
    /// Request the new state and return the state the server reports.
    async fn set_enabled(&self, code: &SessionCode, enabled: bool) -> InferenceResult<bool>;
}

/// [`InferenceSwitch`] posting to the toggle endpoint
#[derive(Debug, Clone)]
pub struct HttpInferenceSwitch {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl HttpInferenceSwitch {
    pub fn new(config: &InferenceConfig) -> InferenceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl InferenceSwitch for HttpInferenceSwitch {
    async fn set_enabled(&self, code: &SessionCode, enabled: bool) -> InferenceResult<bool> {
        let url = self.config.toggle_endpoint(code.as_str());
        tracing::debug!("POST {} enabled={}", url, enabled);

        let response = self
            .client
            .post(&url)
            .json(&InferenceToggle { enabled })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Http {
                status: Some(status.as_u16()),
                message: if body.is_empty() { status.to_string() } else { body },
            });
        }

        let reply: InferenceToggleResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(format!("Malformed toggle response: {}", e)))?;

        Ok(reply.inference_enabled)
    }
}
