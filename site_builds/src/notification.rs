//! Build outcome notifications sent to the initiating user.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Build, BuildType, Site};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    BuildSucceeded,
    BuildFailed,
}

/// A templated message addressed to a user; the delivery collaborator
/// resolves the user's address and renders the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient_user_id: i64,
    pub template: NotificationTemplate,
    pub subject: String,
    pub site_key: String,
    pub build_id: i64,
    pub site_build_number: i64,
    pub build_type: BuildType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl Notification {
    /// Success notice for `build`, or `None` for system-triggered builds.
    pub fn succeeded(build: &Build, site: &Site) -> Option<Self> {
        Self::for_build(build, site, NotificationTemplate::BuildSucceeded)
    }

    /// Failure notice for `build`, or `None` for system-triggered builds.
    pub fn failed(build: &Build, site: &Site) -> Option<Self> {
        Self::for_build(build, site, NotificationTemplate::BuildFailed)
    }

    fn for_build(build: &Build, site: &Site, template: NotificationTemplate) -> Option<Self> {
        let outcome = match template {
            NotificationTemplate::BuildSucceeded => "succeeded",
            NotificationTemplate::BuildFailed => "failed",
        };
        Some(Self {
            recipient_user_id: build.initiating_user_id?,
            template,
            subject: format!(
                "{} build #{} of {} {outcome}",
                build.build_type, build.site_build_number, site.site_key
            ),
            site_key: site.site_key.clone(),
            build_id: build.id,
            site_build_number: build.site_build_number,
            build_type: build.build_type,
            failure_message: build.failure_message.clone(),
        })
    }
}

/// The delivery collaborator. Fire-and-forget from the engine's side.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationService;

#[async_trait]
impl NotificationService for LoggingNotificationService {
    async fn send(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            user_id = notification.recipient_user_id,
            build_id = notification.build_id,
            template = ?notification.template,
            "{}",
            notification.subject
        );
        Ok(())
    }
}

/// Keeps every notification, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotificationService {
    sent: RwLock<Vec<Notification>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("notification log lock poisoned")
}

impl RecordingNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every notification sent so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn sent(&self) -> Result<Vec<Notification>> {
        Ok(self.sent.read().map_err(poison_err)?.clone())
    }
}

#[async_trait]
impl NotificationService for RecordingNotificationService {
    async fn send(&self, notification: Notification) -> Result<()> {
        self.sent.write().map_err(poison_err)?.push(notification);
        Ok(())
    }
}
