//! Hand-off of build ids to asynchronous execution.
//!
//! The engine only submits tasks; a worker elsewhere receives the
//! [`BuildTask`] and calls back into
//! [`BuildService::run_build`](crate::service::BuildService::run_build).

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Task identifier prefix used for build runs.
pub const RUN_BUILD_TASK: &str = "run-build";

/// Payload a worker receives for one queued build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTask {
    pub build_id: i64,
}

impl BuildTask {
    /// Identifier unique to the build, letting transports deduplicate.
    pub fn task_identifier(&self) -> String {
        format!("{RUN_BUILD_TASK}-{}", self.build_id)
    }
}

/// The queue transport.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Submits a task. Fails fast; no retries.
    async fn queue_task(
        &self,
        queue_name: &str,
        task_identifier: &str,
        description: &str,
        configuration: serde_json::Value,
    ) -> Result<()>;
}

/// A task as recorded by [`InMemoryQueueClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub queue_name: String,
    pub task_identifier: String,
    pub description: String,
    pub configuration: serde_json::Value,
}

impl QueuedTask {
    /// Decodes the configuration as a build task.
    pub fn build_task(&self) -> Result<BuildTask> {
        Ok(serde_json::from_value(self.configuration.clone())?)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: Vec<QueuedTask>,
    failing: bool,
}

/// In-memory queue for tests. Records submissions; can be told to fail.
#[derive(Debug, Default)]
pub struct InMemoryQueueClient {
    state: RwLock<QueueState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::queue("task queue lock poisoned")
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent submissions fail (or succeed again).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_failing(&self, failing: bool) -> Result<()> {
        self.state.write().map_err(poison_err)?.failing = failing;
        Ok(())
    }

    /// Returns all submitted tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn tasks(&self) -> Result<Vec<QueuedTask>> {
        Ok(self.state.read().map_err(poison_err)?.tasks.clone())
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn queue_task(
        &self,
        queue_name: &str,
        task_identifier: &str,
        description: &str,
        configuration: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if state.failing {
            drop(state);
            return Err(Error::queue(format!("queue {queue_name} unavailable")));
        }
        state.tasks.push(QueuedTask {
            queue_name: queue_name.to_string(),
            task_identifier: task_identifier.to_string(),
            description: description.to_string(),
            configuration,
        });
        drop(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_task_wire_format() {
        let task = BuildTask { build_id: 12 };
        assert_eq!(serde_json::to_value(task).unwrap(), serde_json::json!({"buildId": 12}));
        assert_eq!(task.task_identifier(), "run-build-12");
    }

    #[tokio::test]
    async fn failing_queue_records_nothing() -> Result<()> {
        let queue = InMemoryQueueClient::new();
        queue.set_failing(true)?;
        let err = queue
            .queue_task("builds", "run-build-1", "Build 1", serde_json::json!({"buildId": 1}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unavailable"));
        assert!(queue.tasks()?.is_empty());

        queue.set_failing(false)?;
        queue
            .queue_task("builds", "run-build-1", "Build 1", serde_json::json!({"buildId": 1}))
            .await?;
        assert_eq!(queue.tasks()?[0].build_task()?.build_id, 1);
        Ok(())
    }
}
