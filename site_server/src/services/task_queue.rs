//! Queue transports: an HTTP push queue, and an in-process channel feeding
//! [`super::worker::run_worker`].

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tokio::sync::mpsc;

use statichost_builds::queue::{BuildTask, QueueClient};
use statichost_builds::{Error, Result};

use super::signature::{self, SIGNATURE_HEADER};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskEnvelope<'a> {
    queue_name: &'a str,
    task_identifier: &'a str,
    description: &'a str,
    configuration: &'a serde_json::Value,
}

/// Submits tasks to a push queue over HTTP. The queue later POSTs each
/// task's configuration back to `/tasks/run-build`.
#[derive(Clone)]
pub struct HttpTaskQueue {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl HttpTaskQueue {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl QueueClient for HttpTaskQueue {
    async fn queue_task(
        &self,
        queue_name: &str,
        task_identifier: &str,
        description: &str,
        configuration: serde_json::Value,
    ) -> Result<()> {
        let body = serde_json::to_vec(&TaskEnvelope {
            queue_name,
            task_identifier,
            description,
            configuration: &configuration,
        })?;

        let mut request = self.client.post(&self.url).header(CONTENT_TYPE, "application/json");
        if let Some(signature) = signature::sign(&self.secret, &body) {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let resp = request
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Error::queue_with_source(format!("push queue unreachable at {}", self.url), e)
            })?;
        if !resp.status().is_success() {
            return Err(Error::queue(format!(
                "push queue rejected {task_identifier}: {}",
                resp.status()
            )));
        }

        tracing::debug!(queue = queue_name, task = task_identifier, "Task submitted to push queue");
        Ok(())
    }
}

/// Hands tasks to the in-process worker.
#[derive(Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::Sender<BuildTask>,
}

impl LocalTaskQueue {
    /// Creates the queue and the receiver the worker drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BuildTask>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    pub async fn push(&self, task: BuildTask) -> Result<()> {
        self.sender
            .send(task)
            .await
            .map_err(|_| Error::queue("in-process build worker has stopped"))
    }
}

#[async_trait]
impl QueueClient for LocalTaskQueue {
    async fn queue_task(
        &self,
        queue_name: &str,
        task_identifier: &str,
        _description: &str,
        configuration: serde_json::Value,
    ) -> Result<()> {
        let task: BuildTask = serde_json::from_value(configuration)?;
        self.push(task).await?;
        tracing::debug!(
            queue = queue_name,
            task = task_identifier,
            "Task handed to in-process worker"
        );
        Ok(())
    }
}
