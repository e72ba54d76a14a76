//! Server configuration, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use statichost_builds::service::DEFAULT_QUEUE_NAME;

use crate::services::signature::CallbackAuth;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Queue name build tasks are submitted under.
    pub queue_name: String,
    /// Push-queue endpoint. Empty selects the in-process worker.
    pub queue_url: String,
    /// HMAC secret shared with the push queue for worker callbacks.
    pub task_secret: String,
    /// Base directory for site storage roots.
    pub storage_dir: PathBuf,
    /// Mail relay endpoint. Empty logs notifications instead.
    pub notify_url: String,
    /// Delay before the in-process worker retries a rejected build.
    pub worker_retry: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let queue_name = var("STATICHOST_QUEUE_NAME")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
        let queue_url = var("STATICHOST_QUEUE_URL").unwrap_or_default();
        let task_secret = var("STATICHOST_TASK_SECRET").unwrap_or_default();
        let storage_dir = var("STATICHOST_STORAGE_DIR")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "./site-storage".to_string())
            .into();
        let notify_url = var("STATICHOST_NOTIFY_URL").unwrap_or_default();
        let worker_retry_secs = var("STATICHOST_WORKER_RETRY_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        if task_secret.is_empty() && !queue_url.is_empty() {
            tracing::warn!(
                "STATICHOST_TASK_SECRET not set with a push queue -- callbacks will be refused"
            );
        } else if task_secret.is_empty() {
            tracing::warn!(
                "STATICHOST_TASK_SECRET not set -- worker callback signature validation disabled"
            );
        }
        if notify_url.is_empty() {
            tracing::warn!(
                "STATICHOST_NOTIFY_URL not set -- build notifications will only be logged"
            );
        }

        Self {
            queue_name,
            queue_url,
            task_secret,
            storage_dir,
            notify_url,
            worker_retry: Duration::from_secs(worker_retry_secs),
        }
    }

    /// Whether builds are dispatched through the in-process worker.
    pub fn uses_local_worker(&self) -> bool {
        self.queue_url.is_empty()
    }

    /// Authentication for worker callbacks.
    pub fn callback_auth(&self) -> CallbackAuth {
        CallbackAuth::new(&self.task_secret, !self.uses_local_worker())
    }
}
