//! Latest-frame polling
//!
//! `GET {http_url}/{code}` returns the most recent inference frame. A 404
//! means no frame has been produced yet; a 501 means the server does not
//! offer polling at all.

use crate::config::InferenceConfig;
use crate::error::{InferenceError, InferenceResult};
use async_trait::async_trait;
use liveview_values::{InferenceFrame, SessionCode};
use reqwest::StatusCode;

/// Source of the latest inference frame for a session
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Fetch the latest frame.
    ///
    /// `Ok(None)` when no frame exists yet, [`InferenceError::Unsupported`]
    /// when the server cannot be polled.
    async fn fetch_latest(&self, code: &SessionCode) -> InferenceResult<Option<InferenceFrame>>;
}

/// [`FrameSource`] backed by the REST endpoint
#[derive(Debug, Clone)]
pub struct HttpFrameSource {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl HttpFrameSource {
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
impl FrameSource for HttpFrameSource {
    async fn fetch_latest(&self, code: &SessionCode) -> InferenceResult<Option<InferenceFrame>> {
        let url = self.config.latest_endpoint(code.as_str());
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::NOT_IMPLEMENTED => return Err(InferenceError::Unsupported),
            status if !status.is_success() => {
                return Err(InferenceError::Http {
                    status: Some(status.as_u16()),
                    message: status.to_string(),
                });
            }
            _ => {}
        }

        let body = response.text().await?;
        let frame = InferenceFrame::from_json(&body)?;
        Ok(Some(frame))
    }
}
