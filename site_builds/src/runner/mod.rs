//! Build runners: the work each build type performs.
//!
//! [`BuildService`](crate::service::BuildService) never knows which runner it
//! calls: it asks the [`RunnerRegistry`] for the runner registered under the
//! build's type. Adding a build type means adding an enum variant and one
//! registration.

pub mod current;
pub mod source_upload;
pub mod version_revert;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Build, BuildType, Site};
use crate::processor::standard_chain;
use crate::sites::SiteService;
use crate::source::SourceService;
use crate::storage::SiteStorageManager;

pub use current::CurrentBuildRunner;
pub use source_upload::SourceUploadBuildRunner;
pub use version_revert::VersionRevertBuildRunner;

/// Performs the deployment work for one build attempt.
///
/// Any error is recorded by the service as the build's failure.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_build(&self, build: &Build, site: &Site) -> Result<()>;
}

/// Maps build types to runners.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<BuildType, Arc<dyn BuildRunner>>,
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(&str, &str)> = self
            .runners
            .iter()
            .map(|(t, r)| (t.as_str(), r.name()))
            .collect();
        entries.sort_unstable();
        f.debug_map().entries(entries).finish()
    }
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `runner` for `build_type`, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, build_type: BuildType, runner: Arc<dyn BuildRunner>) -> Self {
        self.runners.insert(build_type, runner);
        self
    }

    /// The production wiring: one content runner for CURRENT, PREVIEW and
    /// PUBLISH, plus the source-upload and version-revert runners.
    pub fn standard(
        storage: Arc<dyn SiteStorageManager>,
        source: Arc<dyn SourceService>,
        sites: Arc<dyn SiteService>,
    ) -> Self {
        let current: Arc<dyn BuildRunner> = Arc::new(CurrentBuildRunner::new(
            storage.clone(),
            source.clone(),
            standard_chain(),
        ));
        Self::new()
            .register(BuildType::Current, current.clone())
            .register(BuildType::Preview, current.clone())
            .register(BuildType::Publish, current)
            .register(
                BuildType::SourceUpload,
                Arc::new(SourceUploadBuildRunner::new(source, sites)),
            )
            .register(
                BuildType::VersionRevert,
                Arc::new(VersionRevertBuildRunner::new(storage)),
            )
    }

    pub fn get(&self, build_type: BuildType) -> Result<Arc<dyn BuildRunner>> {
        self.runners
            .get(&build_type)
            .cloned()
            .ok_or(Error::NoRunner { build_type })
    }
}
