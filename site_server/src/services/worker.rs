//! In-process build worker. Drains the [`LocalTaskQueue`] and runs builds.
//!
//! Used when no push queue is configured. Each task runs in its own tokio
//! task so builds of different sites proceed in parallel; a build rejected
//! because its site is busy is put back on the queue after a delay.
//!
//! On shutdown the worker stops taking tasks and waits for every running
//! build to finish. Tasks left in the channel stay QUEUED in the store and
//! are resubmitted by [`BuildService::recover_after_restart`] on the next
//! start.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use statichost_builds::model::BuildStatus;
use statichost_builds::queue::BuildTask;
use statichost_builds::BuildService;

use super::task_queue::LocalTaskQueue;

/// What happened to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The build ran and reached this terminal status.
    Finished(BuildStatus),
    /// The site was busy; the task was queued again.
    Requeued,
    /// The site was busy and the worker is stopping; the build stays QUEUED.
    Deferred,
    /// The task could not be processed and was discarded.
    Dropped,
}

/// Run the worker loop until `shutdown` flips to true or every queue handle
/// is dropped, then wait for in-flight builds. Spawned as a background tokio
/// task.
pub async fn run_worker(
    service: BuildService,
    queue: LocalTaskQueue,
    mut tasks: mpsc::Receiver<BuildTask>,
    retry_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        queue = %service.queue_name(),
        retry_secs = retry_delay.as_secs(),
        "Build worker started"
    );

    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            task = tasks.recv() => {
                let Some(task) = task else { break };
                let service = service.clone();
                let queue = queue.clone();
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    process_task(&service, &queue, task, retry_delay, shutdown).await
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join(joined);
            }
            true = stopping(&mut shutdown) => break,
        }
    }

    if !in_flight.is_empty() {
        tracing::info!(builds = in_flight.len(), "Waiting for running builds to finish");
    }
    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
    tracing::info!("Build worker stopped");
}

/// Resolves to true once shutdown is requested, false if the sender is gone.
async fn stopping(shutdown: &mut watch::Receiver<bool>) -> bool {
    shutdown.wait_for(|stop| *stop).await.is_ok()
}

fn log_join(joined: Result<TaskOutcome, tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Build task panicked");
    }
}

/// Run one task.
pub async fn process_task(
    service: &BuildService,
    queue: &LocalTaskQueue,
    task: BuildTask,
    retry_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> TaskOutcome {
    match service.run_build(task.build_id).await {
        Ok(build) => {
            tracing::info!(build_id = build.id, status = %build.status, "Build task finished");
            TaskOutcome::Finished(build.status)
        }
        Err(e) if e.is_concurrent_build() => {
            tracing::info!(
                build_id = task.build_id,
                retry_secs = retry_delay.as_secs(),
                "Site busy, requeueing build task"
            );
            tokio::select! {
                () = tokio::time::sleep(retry_delay) => {}
                true = stopping(&mut shutdown) => {
                    tracing::info!(build_id = task.build_id, "Worker stopping, build left queued");
                    return TaskOutcome::Deferred;
                }
            }
            if let Err(e) = queue.push(task).await {
                tracing::error!(build_id = task.build_id, "Failed to requeue build task: {e}");
                return TaskOutcome::Dropped;
            }
            crate::metrics::task_requeued();
            TaskOutcome::Requeued
        }
        Err(e) => {
            tracing::error!(build_id = task.build_id, "Build task error: {e}");
            TaskOutcome::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use statichost_builds::model::{Build, BuildType, Site, SiteType};
    use statichost_builds::notification::LoggingNotificationService;
    use statichost_builds::runner::{BuildRunner, RunnerRegistry};
    use statichost_builds::security::StaticSecurityContext;
    use statichost_builds::sites::InMemorySiteService;
    use statichost_builds::source::ContentSourceService;
    use statichost_builds::storage::MemoryStorageManager;
    use statichost_builds::store::InMemoryBuildStore;
    use statichost_builds::Result;

    use super::*;

    /// Holds each build until the test releases it.
    #[derive(Default)]
    struct GatedRunner {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl BuildRunner for GatedRunner {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn run_build(&self, _build: &Build, _site: &Site) -> Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn service_with(
        runners: impl FnOnce(Arc<InMemorySiteService>) -> RunnerRegistry,
    ) -> Result<(BuildService, LocalTaskQueue, mpsc::Receiver<BuildTask>)> {
        let sites = Arc::new(InMemorySiteService::new());
        sites.insert(Site::new(1, 1, "acme", SiteType::Plain))?;
        let runners = runners(sites.clone());
        let (queue, tasks) = LocalTaskQueue::channel(16);
        let service = BuildService::new(
            Arc::new(InMemoryBuildStore::new()),
            sites,
            Arc::new(StaticSecurityContext::system()),
            Arc::new(queue.clone()),
            Arc::new(LoggingNotificationService),
            runners,
        );
        Ok((service, queue, tasks))
    }

    fn setup() -> Result<(BuildService, LocalTaskQueue, mpsc::Receiver<BuildTask>)> {
        service_with(|sites| {
            let storage = Arc::new(MemoryStorageManager::new());
            RunnerRegistry::standard(
                storage.clone(),
                Arc::new(ContentSourceService::new(storage)),
                sites,
            )
        })
    }

    /// A shutdown signal that never fires.
    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn queued_build_runs_from_the_channel() -> Result<()> {
        let (service, queue, mut tasks) = setup()?;
        let build = service.create_preview_build("acme").await?;

        let task = tasks.recv().await.expect("queued task");
        assert_eq!(task.build_id, build.id);

        let outcome = process_task(&service, &queue, task, Duration::ZERO, running()).await;
        assert_eq!(outcome, TaskOutcome::Finished(BuildStatus::Succeeded));
        Ok(())
    }

    #[tokio::test]
    async fn busy_site_requeues_the_task() -> Result<()> {
        let (service, queue, mut tasks) = setup()?;
        let first = service.create_production_build("acme").await?;
        let second = service.create_production_build("acme").await?;
        tasks.recv().await;
        tasks.recv().await;

        service
            .register_status_change(first.id, BuildStatus::Running, None)
            .await?;
        let task = BuildTask { build_id: second.id };
        let outcome = process_task(&service, &queue, task, Duration::ZERO, running()).await;

        assert_eq!(outcome, TaskOutcome::Requeued);
        assert_eq!(tasks.recv().await, Some(BuildTask { build_id: second.id }));
        assert_eq!(service.get_build(second.id).await?.status, BuildStatus::Queued);
        Ok(())
    }

    #[tokio::test]
    async fn busy_site_during_shutdown_leaves_build_queued() -> Result<()> {
        let (service, queue, mut tasks) = setup()?;
        let first = service.create_production_build("acme").await?;
        let second = service.create_production_build("acme").await?;
        tasks.recv().await;
        tasks.recv().await;
        service
            .register_status_change(first.id, BuildStatus::Running, None)
            .await?;

        let (stop, shutdown) = watch::channel(false);
        stop.send_replace(true);
        let task = BuildTask { build_id: second.id };
        let outcome =
            process_task(&service, &queue, task, Duration::from_secs(3600), shutdown).await;

        assert_eq!(outcome, TaskOutcome::Deferred);
        assert!(tasks.try_recv().is_err());
        assert_eq!(service.get_build(second.id).await?.status, BuildStatus::Queued);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_builds() -> Result<()> {
        let runner = Arc::new(GatedRunner::default());
        let gated = runner.clone();
        let (service, queue, tasks) =
            service_with(|_| RunnerRegistry::new().register(BuildType::Preview, gated))?;
        let build = service.create_preview_build("acme").await?;

        let (stop, shutdown) = watch::channel(false);
        let worker = tokio::spawn(run_worker(
            service.clone(),
            queue,
            tasks,
            Duration::ZERO,
            shutdown,
        ));

        runner.started.notified().await;
        stop.send_replace(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());
        assert_eq!(service.get_build(build.id).await?.status, BuildStatus::Running);

        runner.release.notify_one();
        worker.await.expect("worker task");
        assert_eq!(service.get_build(build.id).await?.status, BuildStatus::Succeeded);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_build_is_dropped() -> Result<()> {
        let (service, queue, _tasks) = setup()?;
        let task = BuildTask { build_id: 404 };
        let outcome = process_task(&service, &queue, task, Duration::ZERO, running()).await;
        assert_eq!(outcome, TaskOutcome::Dropped);
        Ok(())
    }
}
