//! HTTP offer exchange for the non-multiplexed connection mode

use crate::config::WebRtcConfig;
use crate::error::{WebRtcError, WebRtcResult};
use crate::traits::OfferExchange;
use async_trait::async_trait;
use liveview_values::{OfferRequest, OfferResponse, SdpType, SessionCode};

/// Posts offers to the offer endpoint
#[derive(Debug, Clone)]
pub struct HttpOfferClient {
    client: reqwest::Client,
    offer_url: String,
}

impl HttpOfferClient {
    pub fn new(config: &WebRtcConfig) -> WebRtcResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            client,
            offer_url: config.offer_url.clone(),
        })
    }
}

#[async_trait]
impl OfferExchange for HttpOfferClient {
    async fn exchange(&self, code: &SessionCode, sdp: String) -> WebRtcResult<OfferResponse> {
        let request = OfferRequest {
            code: code.clone(),
            sdp,
            sdp_type: SdpType::Offer,
        };

        tracing::debug!("POST {} for session {}", self.offer_url, code);
        let response = self.client.post(&self.offer_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebRtcError::Http {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let answer: OfferResponse = response.json().await.map_err(|e| {
            WebRtcError::Negotiation(format!("Malformed offer response: {}", e))
        })?;

        if answer.sdp_type != SdpType::Answer {
            return Err(WebRtcError::Negotiation(format!(
                "Expected an answer, got {:?}",
                answer.sdp_type
            )));
        }

        Ok(answer)
    }
}
