//! Webhook delivery of completion payloads.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::hook::CompletionHook;
use super::CompletionPayload;

pub struct WebhookHook {
    client: reqwest::Client,
    url: String,
}

impl WebhookHook {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl CompletionHook for WebhookHook {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, payload: &CompletionPayload) -> Result<()> {
        info!("Sending webhook notification to: {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to send webhook to {}", self.url))?;

        let status = response.status();
        if status.is_success() {
            info!("Webhook sent successfully (status: {})", status.as_u16());
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if !body.is_empty() {
            warn!("Webhook response: {}", body.trim());
        }
        bail!("Webhook returned status {}", status.as_u16())
    }
}
