/// Operator notification channel

use async_trait::async_trait;

#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// Sends operator notifications to the error log
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl OperatorNotifier for TracingNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        tracing::error!("🚨 Operator notification: {} - {}", subject, body);
    }
}
