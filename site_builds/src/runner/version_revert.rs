use std::sync::Arc;

use async_trait::async_trait;

use super::BuildRunner;
use crate::error::{Error, Result};
use crate::model::{Build, Site};
use crate::storage::SiteStorageManager;

/// Restores an earlier version of the site's content root.
pub struct VersionRevertBuildRunner {
    storage: Arc<dyn SiteStorageManager>,
}

impl VersionRevertBuildRunner {
    pub fn new(storage: Arc<dyn SiteStorageManager>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl BuildRunner for VersionRevertBuildRunner {
    fn name(&self) -> &'static str {
        "version-revert"
    }

    async fn run_build(&self, build: &Build, site: &Site) -> Result<()> {
        let target_version = build
            .data
            .as_ref()
            .and_then(|data| data.target_version())
            .ok_or(Error::MissingPayload {
                build_id: build.id,
                expected: "targetVersion",
            })?;

        tracing::info!(
            build_id = build.id,
            site_key = %site.site_key,
            target_version,
            "Reverting site content"
        );
        self.storage
            .content_root(site)?
            .revert_to_previous_version(target_version)
            .await
    }
}
