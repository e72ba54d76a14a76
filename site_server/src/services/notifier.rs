//! Mail relay transport for build notifications.

use async_trait::async_trait;

use statichost_builds::notification::{Notification, NotificationService};
use statichost_builds::{Error, Result};

/// POSTs each notification as JSON to a mail relay.
#[derive(Clone)]
pub struct HttpNotificationService {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationService {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationService for HttpNotificationService {
    async fn send(&self, notification: Notification) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .header("User-Agent", "statichost")
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::notification(format!("mail relay unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::notification(format!("mail relay returned {status}: {body}")));
        }

        tracing::debug!(
            build_id = notification.build_id,
            recipient = notification.recipient_user_id,
            "Build notification delivered"
        );
        Ok(())
    }
}
