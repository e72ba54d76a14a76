mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use statichost_builds::model::{Build, BuildStatus, BuildType, NewBuild, Site, SiteType};
use statichost_builds::notification::RecordingNotificationService;
use statichost_builds::queue::InMemoryQueueClient;
use statichost_builds::runner::RunnerRegistry;
use statichost_builds::security::StaticSecurityContext;
use statichost_builds::sites::InMemorySiteService;
use statichost_builds::store::{BuildStore, ClaimResult, InMemoryBuildStore};
use statichost_builds::{BuildService, Error, Result};

use common::{alice, Harness, SpyRunner};

/// Hands out the first copy it ever read of each build, like a worker that
/// fetched a task before another worker picked it up.
#[derive(Default)]
struct FirstReadStore {
    inner: InMemoryBuildStore,
    first_reads: Mutex<HashMap<i64, Build>>,
}

#[async_trait]
impl BuildStore for FirstReadStore {
    async fn insert(&self, build: NewBuild) -> Result<Build> {
        self.inner.insert(build).await
    }

    async fn save(&self, build: &Build) -> Result<()> {
        self.inner.save(build).await
    }

    async fn fetch(&self, build_id: i64) -> Result<Option<Build>> {
        if let Some(build) = self.first_reads.lock().unwrap().get(&build_id) {
            return Ok(Some(build.clone()));
        }
        let build = self.inner.fetch(build_id).await?;
        if let Some(build) = &build {
            self.first_reads.lock().unwrap().insert(build_id, build.clone());
        }
        Ok(build)
    }

    async fn count_running_for_site(&self, site_id: i64, excluding_build_id: i64) -> Result<u64> {
        self.inner.count_running_for_site(site_id, excluding_build_id).await
    }

    async fn claim_running(&self, build: &Build) -> Result<ClaimResult> {
        self.inner.claim_running(build).await
    }

    async fn list_with_status(&self, status: BuildStatus) -> Result<Vec<Build>> {
        self.inner.list_with_status(status).await
    }

    async fn list_for_site(
        &self,
        site_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Build>> {
        self.inner.list_for_site(site_id, limit, offset).await
    }
}

#[tokio::test]
async fn overlapping_runs_for_one_site_admit_a_single_build() -> Result<()> {
    let runner = SpyRunner::slow(Duration::from_millis(50));
    let h = Harness::with_runners(
        Some(alice()),
        RunnerRegistry::new().register(BuildType::Publish, runner.clone()),
    );
    h.add_site(1, "acme", SiteType::Plain)?;
    let a = h.service.create_production_build("acme").await?;
    let b = h.service.create_production_build("acme").await?;

    let (ra, rb) = tokio::join!(h.service.run_build(a.id), h.service.run_build(b.id));

    let outcomes = [ra, rb];
    let succeeded = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(build) if build.status == BuildStatus::Succeeded))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_concurrent_build()))
        .count();
    assert_eq!((succeeded, rejected), (1, 1));
    assert_eq!(runner.calls().len(), 1);

    let statuses = [
        h.service.get_build(a.id).await?.status,
        h.service.get_build(b.id).await?.status,
    ];
    assert!(statuses.contains(&BuildStatus::Succeeded));
    assert!(statuses.contains(&BuildStatus::Queued));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_workers_never_run_two_builds_of_a_site() -> Result<()> {
    let runner = SpyRunner::slow(Duration::from_millis(20));
    let h = Harness::with_runners(
        None,
        RunnerRegistry::new().register(BuildType::Preview, runner.clone()),
    );
    h.add_site(1, "acme", SiteType::Plain)?;

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(h.service.create_preview_build("acme").await?.id);
    }

    let mut handles = Vec::new();
    for id in ids.iter().copied() {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move { service.run_build(id).await }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("worker task panicked") {
            Ok(build) => {
                assert_eq!(build.status, BuildStatus::Succeeded);
                succeeded += 1;
            }
            Err(e) => {
                assert!(e.is_concurrent_build(), "unexpected error: {e}");
                rejected += 1;
            }
        }
    }

    assert!(succeeded >= 1);
    assert_eq!(succeeded + rejected, 8);
    assert_eq!(runner.max_in_flight(), 1);
    for id in ids {
        let status = h.service.get_build(id).await?.status;
        assert!(
            matches!(status, BuildStatus::Succeeded | BuildStatus::Queued),
            "build {id} ended {status}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_creates_get_distinct_numbers() -> Result<()> {
    let h = Harness::standard();
    h.add_site(1, "acme", SiteType::Plain)?;

    let (a, b, c) = tokio::join!(
        h.service.create_preview_build("acme"),
        h.service.create_preview_build("acme"),
        h.service.create_preview_build("acme"),
    );
    let mut numbers = vec![a?.site_build_number, b?.site_build_number, c?.site_build_number];
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn redelivered_task_with_stale_read_does_not_run_twice() -> Result<()> {
    let store = Arc::new(FirstReadStore::default());
    let sites = Arc::new(InMemorySiteService::new());
    sites.insert(Site::new(1, 100, "acme", SiteType::Plain))?;
    let runner = SpyRunner::new();
    let notifications = Arc::new(RecordingNotificationService::new());
    let service = BuildService::new(
        store.clone(),
        sites,
        Arc::new(StaticSecurityContext::for_user(alice())),
        Arc::new(InMemoryQueueClient::new()),
        notifications.clone(),
        RunnerRegistry::new().register(BuildType::Publish, runner.clone()),
    );

    let build = service.create_production_build("acme").await?;
    let first = service.run_build(build.id).await?;
    assert_eq!(first.status, BuildStatus::Succeeded);

    let err = service.run_build(build.id).await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::InvalidStatusTransition {
                from: BuildStatus::Succeeded,
                to: BuildStatus::Running
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(runner.calls().len(), 1);
    assert_eq!(notifications.sent()?.len(), 1);

    let stored = store.inner.fetch(build.id).await?.expect("stored build");
    assert_eq!(stored.status, BuildStatus::Succeeded);
    assert_eq!(stored.completed_date, first.completed_date);
    Ok(())
}
