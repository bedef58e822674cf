//! Notification sinks available to the CLI.

use std::time::Duration;

use async_trait::async_trait;
use sitedrop_core::contract::{CollaboratorError, Notification, Notifier};
use tracing::{debug, info};

/// Posts each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        debug!(url = %self.url, ?notification, "[NOTIFY] Posting notification");
        let response = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await?
            .error_for_status()?;
        info!(status = %response.status(), "[NOTIFY] Webhook accepted notification");
        Ok(())
    }
}
