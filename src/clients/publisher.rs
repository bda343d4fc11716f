/// Legacy publishing pipeline client
///
/// Accepted records are uploaded to the legacy system, which ingests them
/// asynchronously and later calls back with the assigned record id. The object id
/// travels as the upload "nonce" so the callback can find its way back.

use crate::workflow::types::WorkflowObject;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn submit(&self, object: &WorkflowObject, callback_url: &str) -> Result<()>;
}

/// Publisher used when no endpoint is configured: logs the upload only
#[derive(Debug, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn submit(&self, object: &WorkflowObject, callback_url: &str) -> Result<()> {
        tracing::info!(
            "📤 Legacy upload disabled; object {} would call back to {}",
            object.id,
            callback_url
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpPublisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build publisher client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn submit(&self, object: &WorkflowObject, callback_url: &str) -> Result<()> {
        tracing::debug!("📤 Uploading object {} to {}", object.id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "nonce": object.id,
                "callback_url": callback_url,
                "record": object.data,
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Legacy upload request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Legacy upload rejected with status {}",
                response.status()
            ));
        }

        tracing::info!("✅ Object {} submitted to legacy pipeline", object.id);
        Ok(())
    }
}
