//! Push-style alerts for errors that operators should hear about.
//!
//! Delivery is fire-and-forget: the terminal handler spawns it and never waits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Alert delivery failure. Logged, never surfaced to the client.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("alert delivery failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("alert endpoint answered {status}")]
    Rejected { status: u16 },
}

/// One alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub text: String,
}

impl Alert {
    /// Alert for a failed request.
    pub fn for_request(method: &str, path: &str, status: u16, message: impl Into<String>) -> Self {
        Self {
            title: format!("Server Error on {method} {path} {status}"),
            text: message.into(),
        }
    }
}

/// Something that can deliver alerts.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: Alert) -> Result<(), NotifyError>;
}

/// Drops every alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl AlertNotifier for NoopNotifier {
    async fn notify(&self, _alert: Alert) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    title: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
}

/// Posts alerts as JSON to a push-notification webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    device_id: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, device_id: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            device_id,
        })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, alert: Alert) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            title: &alert.title,
            text: &alert.text,
            device_id: self.device_id.as_deref(),
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Deliver an alert on a background task.
pub(crate) fn dispatch(notifier: Arc<dyn AlertNotifier>, alert: Alert) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(alert).await {
            tracing::warn!(error = %e, "Failed to deliver error alert");
        }
    });
}
