/// Relevance classifier client
///
/// The classifier scores a submission's title and abstract and returns a decision
/// ("CORE", "Non-CORE", "Rejected") with its maximum score.

use crate::workflow::types::Prediction;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Predict relevance for a payload; None when the service is not configured
    async fn predict(&self, data: &Value) -> Result<Option<Prediction>>;
}

/// Classifier used when no endpoint is configured
#[derive(Debug, Default)]
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn predict(&self, _data: &Value) -> Result<Option<Prediction>> {
        Ok(None)
    }
}

/// HTTP classifier: POST {title, abstract} -> {decision, max_score}
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build classifier client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn predict(&self, data: &Value) -> Result<Option<Prediction>> {
        let title = data
            .pointer("/titles/0/title")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let abstract_text = data
            .pointer("/abstracts/0/value")
            .and_then(Value::as_str)
            .unwrap_or_default();

        tracing::debug!("🔮 Requesting relevance prediction from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "title": title, "abstract": abstract_text }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Classifier request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Classifier returned status {}",
                response.status()
            ));
        }

        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid classifier response: {}", e))?;

        Ok(Some(prediction))
    }
}
