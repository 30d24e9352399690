use async_trait::async_trait;
use std::sync::Arc;

use super::{NotificationTask, NotifyError};

/// External push provider. Whatever transport it uses is opaque to the dispatcher.
#[async_trait]
pub trait NotificationProvider: Send + Sync + 'static {
    async fn send(&self, task: &NotificationTask) -> Result<(), NotifyError>;
}

/// Provider used when no push endpoint is configured: records the send in the log.
#[derive(Debug, Default, Clone)]
pub struct LogProvider;

#[async_trait]
impl NotificationProvider for LogProvider {
    async fn send(&self, task: &NotificationTask) -> Result<(), NotifyError> {
        tracing::info!(
            recipient_id = %task.recipient_id,
            title = %task.title,
            "Push notification (no provider configured)"
        );
        Ok(())
    }
}

/// Posts each notification as JSON `{recipient_id, title, body}` to an HTTP endpoint.
/// Any non-2xx response is a failure.
#[derive(Debug, Clone)]
pub struct WebhookProvider {
    client: reqwest::Client,
    url: String,
}

impl WebhookProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    async fn send(&self, task: &NotificationTask) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(task)
            .send()
            .await
            .map_err(|e| NotifyError::Provider(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}

/// Pick the provider for a configured endpoint: webhook when set, log-only otherwise.
pub fn provider_for(url: Option<&str>) -> Arc<dyn NotificationProvider> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            tracing::info!(url = %url, "Push notifications via webhook");
            Arc::new(WebhookProvider::new(url))
        }
        None => {
            tracing::info!("No push provider configured, notifications will be logged");
            Arc::new(LogProvider)
        }
    }
}
