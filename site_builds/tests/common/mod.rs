#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use statichost_builds::model::{Build, ChangedObject, Site, SiteType, User};
use statichost_builds::notification::RecordingNotificationService;
use statichost_builds::queue::InMemoryQueueClient;
use statichost_builds::runner::{BuildRunner, RunnerRegistry};
use statichost_builds::security::{SecurityContext, StaticSecurityContext};
use statichost_builds::sites::InMemorySiteService;
use statichost_builds::source::{ContentSourceService, SOURCE_PREFIX};
use statichost_builds::storage::{MemoryStorageManager, SiteStorageManager};
use statichost_builds::store::InMemoryBuildStore;
use statichost_builds::{BuildService, Error, Result};

pub const ALICE_ID: i64 = 7;

pub fn alice() -> User {
    User {
        id: ALICE_ID,
        name: "Alice".into(),
        email: "alice@example.com".into(),
    }
}

/// A service wired to in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub service: BuildService,
    pub store: Arc<InMemoryBuildStore>,
    pub sites: Arc<InMemorySiteService>,
    pub queue: Arc<InMemoryQueueClient>,
    pub notifications: Arc<RecordingNotificationService>,
    pub storage: Arc<MemoryStorageManager>,
}

impl Harness {
    /// Standard runners, builds initiated by Alice.
    pub fn standard() -> Self {
        Self::build(Some(alice()), None)
    }

    pub fn with_runners(user: Option<User>, runners: RunnerRegistry) -> Self {
        Self::build(user, Some(runners))
    }

    fn build(user: Option<User>, runners: Option<RunnerRegistry>) -> Self {
        let store = Arc::new(InMemoryBuildStore::new());
        let sites = Arc::new(InMemorySiteService::new());
        let queue = Arc::new(InMemoryQueueClient::new());
        let notifications = Arc::new(RecordingNotificationService::new());
        let storage = Arc::new(MemoryStorageManager::new());

        let runners = runners.unwrap_or_else(|| {
            RunnerRegistry::standard(
                storage.clone(),
                Arc::new(ContentSourceService::new(storage.clone())),
                sites.clone(),
            )
        });
        let security: Arc<dyn SecurityContext> = match user {
            Some(user) => Arc::new(StaticSecurityContext::for_user(user)),
            None => Arc::new(StaticSecurityContext::system()),
        };

        let service = BuildService::new(
            store.clone(),
            sites.clone(),
            security,
            queue.clone(),
            notifications.clone(),
            runners,
        );
        Self {
            service,
            store,
            sites,
            queue,
            notifications,
            storage,
        }
    }

    pub fn add_site(&self, id: i64, key: &str, site_type: SiteType) -> Result<Site> {
        let site = Site::new(id, 100, key, site_type);
        self.sites.insert(site.clone())?;
        Ok(site)
    }

    /// Writes authored files into the site's content root, one version per
    /// call.
    pub async fn seed_source(&self, site: &Site, files: &[(&str, &str)]) -> Result<u32> {
        let changes: Vec<ChangedObject> = files
            .iter()
            .map(|(key, body)| ChangedObject::update(format!("{SOURCE_PREFIX}{key}"), *body))
            .collect();
        Ok(self
            .storage
            .content_root(site)?
            .apply_changes(&changes)
            .await?
            .version)
    }
}

/// Records every build it is asked to run; optionally fails or lingers.
#[derive(Default)]
pub struct SpyRunner {
    calls: Mutex<Vec<Build>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SpyRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<Build> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildRunner for SpyRunner {
    fn name(&self) -> &'static str {
        "spy"
    }

    async fn run_build(&self, build: &Build, _site: &Site) -> Result<()> {
        self.calls.lock().unwrap().push(build.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.fail_with {
            Some(message) => Err(Error::runner(message.clone())),
            None => Ok(()),
        }
    }
}
