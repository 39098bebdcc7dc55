//! Webhook notifications.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chronix_core::{HandlerError, TaskHandler};

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;

/// Payload of a `notify:webhook` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub url: String,
    /// JSON body to POST.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl WebhookPayload {
    /// Parse a stored payload, requiring an absolute http(s) URL.
    pub fn parse(payload: &[u8]) -> Result<(Url, serde_json::Value), HandlerError> {
        let parsed: Self = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::InvalidPayload(format!("failed to parse payload: {}", e)))?;

        let url = Url::parse(&parsed.url)
            .map_err(|e| HandlerError::InvalidPayload(format!("invalid url '{}': {}", parsed.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HandlerError::InvalidPayload(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }
        Ok((url, parsed.body))
    }
}

/// Handler for `notify:webhook` tasks.
#[derive(Debug, Clone, Default)]
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for WebhookHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let (url, body) = WebhookPayload::parse(payload)?;

        match self.client.post(url.clone()).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Webhook {} returned {}", url, resp.status());
                Ok(())
            }
            Ok(resp) => {
                warn!("Webhook {} returned {}", url, resp.status());
                Err(HandlerError::Failed(format!(
                    "webhook returned {}",
                    resp.status()
                )))
            }
            Err(e) => {
                warn!("Webhook {} failed: {}", url, e);
                Err(HandlerError::Failed(format!("webhook request failed: {}", e)))
            }
        }
    }
}
