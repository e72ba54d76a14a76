//! Build creation, queueing and execution.
//!
//! [`BuildService`] is the single entry point for the build lifecycle. It owns
//! the at-most-one-running-build-per-site guard and turns runner errors into
//! FAILED build records.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{Build, BuildData, BuildStatus, BuildType, ChangedObject, NewBuild, Site};
use crate::notification::{Notification, NotificationService};
use crate::queue::{BuildTask, QueueClient};
use crate::runner::RunnerRegistry;
use crate::security::SecurityContext;
use crate::sites::SiteService;
use crate::store::{BuildStore, ClaimResult};

/// Queue used when none is configured.
pub const DEFAULT_QUEUE_NAME: &str = "site-builds";

/// Failure message of a build that was RUNNING when its worker stopped.
pub const INTERRUPTED_MESSAGE: &str = "build interrupted by a worker restart";

/// What [`BuildService::recover_after_restart`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Orphaned RUNNING builds recorded as FAILED.
    pub failed: usize,
    /// QUEUED builds submitted again.
    pub resubmitted: usize,
}

/// Orchestrates builds over injected collaborators.
#[derive(Clone)]
pub struct BuildService {
    store: Arc<dyn BuildStore>,
    sites: Arc<dyn SiteService>,
    security: Arc<dyn SecurityContext>,
    queue: Arc<dyn QueueClient>,
    notifications: Arc<dyn NotificationService>,
    runners: RunnerRegistry,
    queue_name: String,
}

impl BuildService {
    pub fn new(
        store: Arc<dyn BuildStore>,
        sites: Arc<dyn SiteService>,
        security: Arc<dyn SecurityContext>,
        queue: Arc<dyn QueueClient>,
        notifications: Arc<dyn NotificationService>,
        runners: RunnerRegistry,
    ) -> Self {
        Self {
            store,
            sites,
            security,
            queue,
            notifications,
            runners,
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
        }
    }

    /// Sets the queue build tasks are submitted to.
    #[must_use]
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Creates a build for the site with key `site_key`.
    ///
    /// `status` is the caller's intent:
    /// - `Pending`: stored only.
    /// - `Queued`: stored, then handed to the queue (see [`Self::queue_build`]).
    /// - `Running`: stored, then run in the caller's task (see
    ///   [`Self::run_build`]).
    ///
    /// The build is stored as PENDING first in the last two cases, so a queue
    /// submission failure or a concurrency rejection leaves a PENDING row.
    pub async fn create_build(
        &self,
        site_key: &str,
        build_type: BuildType,
        status: BuildStatus,
        data: Option<BuildData>,
    ) -> Result<Build> {
        if status.is_terminal() {
            return Err(Error::InvalidInitialStatus { status });
        }

        let site = self.sites.get_site_by_key(site_key).await?;
        if !site.is_active() {
            return Err(Error::SiteNotActive {
                site_key: site.site_key,
            });
        }

        let site_build_number = self.sites.increment_last_build_number(site.id).await?;
        let initiating_user_id = self.security.logged_in_user().map(|user| user.id);

        let build = self
            .store
            .insert(NewBuild {
                account_id: site.account_id,
                site_id: site.id,
                site_build_number,
                initiating_user_id,
                build_type,
                status: BuildStatus::Pending,
                data,
                created_date: chrono::Utc::now(),
            })
            .await?;

        crate::metrics::build_status_changed(BuildStatus::Pending);
        tracing::info!(
            build_id = build.id,
            site_key = %site.site_key,
            site_build_number,
            %build_type,
            "Build created"
        );

        match status {
            BuildStatus::Queued => self.queue_build(build.id).await,
            BuildStatus::Running => self.run_build(build.id).await,
            _ => Ok(build),
        }
    }

    /// Creates a queued PREVIEW build.
    pub async fn create_preview_build(&self, site_key: &str) -> Result<Build> {
        self.create_build(site_key, BuildType::Preview, BuildStatus::Queued, None)
            .await
    }

    /// Creates a queued PUBLISH build.
    pub async fn create_production_build(&self, site_key: &str) -> Result<Build> {
        self.create_build(site_key, BuildType::Publish, BuildStatus::Queued, None)
            .await
    }

    /// Creates a queued build restoring content version `target_version`.
    pub async fn create_version_revert_build(
        &self,
        site_key: &str,
        target_version: u32,
    ) -> Result<Build> {
        self.create_build(
            site_key,
            BuildType::VersionRevert,
            BuildStatus::Queued,
            Some(BuildData::VersionRevert { target_version }),
        )
        .await
    }

    /// Creates a queued build applying an uploaded change set.
    pub async fn create_source_upload_build(
        &self,
        site_key: &str,
        changed_objects: Vec<ChangedObject>,
    ) -> Result<Build> {
        self.create_build(
            site_key,
            BuildType::SourceUpload,
            BuildStatus::Queued,
            Some(BuildData::SourceUpload { changed_objects }),
        )
        .await
    }

    /// Submits the build to the queue, then marks it QUEUED.
    ///
    /// If submission fails the error is returned and the build keeps its
    /// prior status.
    pub async fn queue_build(&self, build_id: i64) -> Result<Build> {
        let mut build = self.fetch(build_id).await?;
        self.submit(&build).await?;

        self.transition(&mut build, BuildStatus::Queued, None).await?;
        tracing::info!(build_id, queue = %self.queue_name, "Build queued");
        Ok(build)
    }

    /// Puts builds a stopped in-process worker left behind back into a
    /// consistent state.
    ///
    /// Only valid when this process is the sole worker: every RUNNING build is
    /// then an orphan and is recorded as FAILED, and every QUEUED build is
    /// submitted to the queue again.
    pub async fn recover_after_restart(&self) -> Result<Recovery> {
        let mut recovery = Recovery::default();

        for mut build in self.store.list_with_status(BuildStatus::Running).await? {
            self.transition(&mut build, BuildStatus::Failed, Some(INTERRUPTED_MESSAGE))
                .await?;
            tracing::warn!(build_id = build.id, "Interrupted build marked failed");
            let site = self.sites.get_site(build.site_id).await?;
            self.notify(Notification::failed(&build, &site)).await;
            recovery.failed += 1;
        }

        for build in self.store.list_with_status(BuildStatus::Queued).await? {
            self.submit(&build).await?;
            recovery.resubmitted += 1;
        }

        if recovery != Recovery::default() {
            tracing::info!(
                failed = recovery.failed,
                resubmitted = recovery.resubmitted,
                "Recovered builds after restart"
            );
        }
        Ok(recovery)
    }

    /// Runs a build to completion in the caller's task.
    ///
    /// Returns the build in its terminal state. A runner error is recorded as
    /// FAILED and is not returned. [`Error::ConcurrentBuild`] is returned,
    /// with the build untouched, when another build of the site is RUNNING.
    /// A build another worker already claimed yields
    /// [`Error::InvalidStatusTransition`] from its stored status.
    pub async fn run_build(&self, build_id: i64) -> Result<Build> {
        let mut build = self.fetch(build_id).await?;
        let site = self.sites.get_site(build.site_id).await?;

        let running = self
            .store
            .count_running_for_site(site.id, build.id)
            .await?;
        if running > 0 {
            return Err(Self::reject(&build, &site, None));
        }

        build.register_status_change(BuildStatus::Running, None)?;
        match self.store.claim_running(&build).await? {
            ClaimResult::Claimed => {}
            ClaimResult::AlreadyRunning { running_build_id } => {
                return Err(Self::reject(&build, &site, Some(running_build_id)));
            }
            ClaimResult::AlreadyClaimed { status } => {
                tracing::info!(build_id, %status, "Build already claimed by another worker");
                return Err(Error::InvalidStatusTransition {
                    from: status,
                    to: BuildStatus::Running,
                });
            }
            ClaimResult::NotFound => return Err(Error::BuildNotFound { build_id }),
        }
        crate::metrics::build_status_changed(BuildStatus::Running);
        tracing::info!(
            build_id,
            site_key = %site.site_key,
            build_type = %build.build_type,
            "Build started"
        );

        match self.execute(&build, &site).await {
            Ok(()) => {
                self.transition(&mut build, BuildStatus::Succeeded, None).await?;
                tracing::info!(build_id, site_key = %site.site_key, "Build succeeded");
                self.notify(Notification::succeeded(&build, &site)).await;
            }
            Err(err) => {
                let message = err.to_string();
                self.transition(&mut build, BuildStatus::Failed, Some(&message))
                    .await?;
                tracing::warn!(
                    build_id,
                    site_key = %site.site_key,
                    error = %message,
                    "Build failed"
                );
                self.notify(Notification::failed(&build, &site)).await;
            }
        }

        if let Some(ms) = build
            .duration()
            .and_then(|d| u64::try_from(d.num_milliseconds()).ok())
        {
            crate::metrics::build_duration(ms);
        }
        Ok(build)
    }

    /// Applies a status change to a stored build and saves it.
    ///
    /// A change to RUNNING goes through the same running-build guard as
    /// [`Self::run_build`].
    pub async fn register_status_change(
        &self,
        build_id: i64,
        status: BuildStatus,
        message: Option<&str>,
    ) -> Result<Build> {
        let mut build = self.fetch(build_id).await?;
        if status != BuildStatus::Running {
            self.transition(&mut build, status, message).await?;
            return Ok(build);
        }

        build.register_status_change(status, message)?;
        match self.store.claim_running(&build).await? {
            ClaimResult::Claimed => {
                crate::metrics::build_status_changed(status);
                Ok(build)
            }
            ClaimResult::AlreadyRunning { running_build_id } => {
                let site = self.sites.get_site(build.site_id).await?;
                Err(Self::reject(&build, &site, Some(running_build_id)))
            }
            ClaimResult::AlreadyClaimed { status: from } => Err(Error::InvalidStatusTransition {
                from,
                to: BuildStatus::Running,
            }),
            ClaimResult::NotFound => Err(Error::BuildNotFound { build_id }),
        }
    }

    pub async fn get_build(&self, build_id: i64) -> Result<Build> {
        self.fetch(build_id).await
    }

    /// Builds of a site, newest first.
    pub async fn list_builds_for_site(
        &self,
        site_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Build>> {
        self.store.list_for_site(site_id, limit, offset).await
    }

    async fn submit(&self, build: &Build) -> Result<()> {
        let task = BuildTask { build_id: build.id };
        let description = format!(
            "{} build #{} for site {}",
            build.build_type, build.site_build_number, build.site_id
        );
        self.queue
            .queue_task(
                &self.queue_name,
                &task.task_identifier(),
                &description,
                serde_json::to_value(task)?,
            )
            .await
    }

    async fn fetch(&self, build_id: i64) -> Result<Build> {
        self.store
            .fetch(build_id)
            .await?
            .ok_or(Error::BuildNotFound { build_id })
    }

    async fn transition(
        &self,
        build: &mut Build,
        status: BuildStatus,
        message: Option<&str>,
    ) -> Result<()> {
        build.register_status_change(status, message)?;
        self.store.save(build).await?;
        crate::metrics::build_status_changed(status);
        Ok(())
    }

    /// Runner work plus the site bookkeeping a successful build implies.
    async fn execute(&self, build: &Build, site: &Site) -> Result<()> {
        let runner = self.runners.get(build.build_type)?;
        runner.run_build(build, site).await?;

        match build.build_type {
            BuildType::Preview => {
                self.sites
                    .record_preview_build(site.id, build.site_build_number)
                    .await
            }
            BuildType::Publish => {
                let published_version = (!site.is_plain()).then(|| site.published_version + 1);
                self.sites
                    .record_publish_build(site.id, build.site_build_number, published_version)
                    .await
            }
            _ => Ok(()),
        }
    }

    fn reject(build: &Build, site: &Site, running_build_id: Option<i64>) -> Error {
        crate::metrics::build_rejected();
        tracing::warn!(
            build_id = build.id,
            site_key = %site.site_key,
            running_build_id,
            "Build rejected, site already has a running build"
        );
        Error::ConcurrentBuild {
            site_key: site.site_key.clone(),
            build_id: build.id,
        }
    }

    async fn notify(&self, notification: Option<Notification>) {
        let Some(notification) = notification else {
            return;
        };
        let build_id = notification.build_id;
        if let Err(e) = self.notifications.send(notification).await {
            tracing::warn!(build_id, error = %e, "Failed to send build notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SiteStatus, SiteType, User};
    use crate::notification::RecordingNotificationService;
    use crate::queue::InMemoryQueueClient;
    use crate::security::StaticSecurityContext;
    use crate::sites::InMemorySiteService;
    use crate::source::ContentSourceService;
    use crate::storage::MemoryStorageManager;
    use crate::store::InMemoryBuildStore;

    struct Harness {
        service: BuildService,
        store: Arc<InMemoryBuildStore>,
        sites: Arc<InMemorySiteService>,
        queue: Arc<InMemoryQueueClient>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryBuildStore::new());
        let sites = Arc::new(InMemorySiteService::new());
        let queue = Arc::new(InMemoryQueueClient::new());
        let storage = Arc::new(MemoryStorageManager::new());
        let runners = RunnerRegistry::standard(
            storage.clone(),
            Arc::new(ContentSourceService::new(storage)),
            sites.clone(),
        );
        let user = User {
            id: 7,
            name: "Alice".into(),
            email: "alice@example.com".into(),
        };
        let service = BuildService::new(
            store.clone(),
            sites.clone(),
            Arc::new(StaticSecurityContext::for_user(user)),
            queue.clone(),
            Arc::new(RecordingNotificationService::new()),
            runners,
        )
        .with_queue_name("test-builds");
        Harness {
            service,
            store,
            sites,
            queue,
        }
    }

    #[tokio::test]
    async fn queued_build_is_submitted_then_marked() -> Result<()> {
        let h = harness();
        h.sites.insert(Site::new(1, 10, "acme", SiteType::Plain))?;

        let build = h.service.create_preview_build("acme").await?;

        assert_eq!(build.status, BuildStatus::Queued);
        assert_eq!(build.account_id, 10);
        assert_eq!(build.initiating_user_id, Some(7));
        assert!(build.queued_date.is_some());
        let tasks = h.queue.tasks()?;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].queue_name, "test-builds");
        assert_eq!(tasks[0].task_identifier, format!("run-build-{}", build.id));
        assert_eq!(tasks[0].build_task()?.build_id, build.id);
        Ok(())
    }

    #[tokio::test]
    async fn suspended_site_creates_nothing() -> Result<()> {
        let h = harness();
        let mut site = Site::new(1, 10, "acme", SiteType::Plain);
        site.status = SiteStatus::Suspended;
        h.sites.insert(site)?;

        let err = h.service.create_production_build("acme").await.unwrap_err();
        assert!(matches!(err, Error::SiteNotActive { .. }));
        assert_eq!(h.store.build_count()?, 0);

        let err = h.service.create_production_build("nope").await.unwrap_err();
        assert!(matches!(err, Error::SiteNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn terminal_initial_status_is_refused() -> Result<()> {
        let h = harness();
        h.sites.insert(Site::new(1, 10, "acme", SiteType::Plain))?;
        let err = h
            .service
            .create_build("acme", BuildType::Preview, BuildStatus::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInitialStatus { status: BuildStatus::Succeeded }));
        Ok(())
    }

    #[tokio::test]
    async fn running_initial_status_runs_synchronously() -> Result<()> {
        let h = harness();
        h.sites.insert(Site::new(1, 10, "acme", SiteType::Plain))?;

        let build = h
            .service
            .create_build("acme", BuildType::Preview, BuildStatus::Running, None)
            .await?;

        assert_eq!(build.status, BuildStatus::Succeeded);
        assert!(h.queue.tasks()?.is_empty());
        assert_eq!(h.sites.get_site(1).await?.last_preview_build, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn manual_running_change_respects_guard() -> Result<()> {
        let h = harness();
        h.sites.insert(Site::new(1, 10, "acme", SiteType::Plain))?;
        let first = h.service.create_production_build("acme").await?;
        let second = h.service.create_production_build("acme").await?;

        h.service
            .register_status_change(first.id, BuildStatus::Running, None)
            .await?;
        let err = h
            .service
            .register_status_change(second.id, BuildStatus::Running, None)
            .await
            .unwrap_err();

        assert!(err.is_concurrent_build());
        assert_eq!(h.service.get_build(second.id).await?.status, BuildStatus::Queued);
        Ok(())
    }

    #[tokio::test]
    async fn restart_recovery_fails_orphans_and_resubmits_queued() -> Result<()> {
        let h = harness();
        h.sites.insert(Site::new(1, 10, "acme", SiteType::Plain))?;
        h.sites.insert(Site::new(2, 10, "globex", SiteType::Plain))?;
        let orphan = h.service.create_production_build("acme").await?;
        let waiting = h.service.create_preview_build("globex").await?;
        h.service
            .register_status_change(orphan.id, BuildStatus::Running, None)
            .await?;
        assert_eq!(h.queue.tasks()?.len(), 2);

        let recovery = h.service.recover_after_restart().await?;

        assert_eq!(recovery, Recovery { failed: 1, resubmitted: 1 });
        let orphan = h.service.get_build(orphan.id).await?;
        assert_eq!(orphan.status, BuildStatus::Failed);
        assert_eq!(orphan.failure_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(h.service.get_build(waiting.id).await?.status, BuildStatus::Queued);

        let tasks = h.queue.tasks()?;
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[2].build_task()?.build_id, waiting.id);

        // The site is free again.
        let next = h.service.create_production_build("acme").await?;
        assert_eq!(h.service.run_build(next.id).await?.status, BuildStatus::Succeeded);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_build_is_not_found() {
        let h = harness();
        let err = h.service.run_build(99).await.unwrap_err();
        assert!(matches!(err, Error::BuildNotFound { build_id: 99 }));
        let err = h.service.queue_build(99).await.unwrap_err();
        assert!(matches!(err, Error::BuildNotFound { build_id: 99 }));
    }
}
