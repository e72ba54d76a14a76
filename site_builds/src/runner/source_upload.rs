use std::sync::Arc;

use async_trait::async_trait;

use super::BuildRunner;
use crate::error::{Error, Result};
use crate::model::{Build, Site};
use crate::sites::SiteService;
use crate::source::SourceService;

/// Applies an uploaded change set to the site's content, then refreshes the
/// site's settings from the new `site.json`.
pub struct SourceUploadBuildRunner {
    source: Arc<dyn SourceService>,
    sites: Arc<dyn SiteService>,
}

impl SourceUploadBuildRunner {
    pub fn new(source: Arc<dyn SourceService>, sites: Arc<dyn SiteService>) -> Self {
        Self { source, sites }
    }
}

#[async_trait]
impl BuildRunner for SourceUploadBuildRunner {
    fn name(&self) -> &'static str {
        "source-upload"
    }

    async fn run_build(&self, build: &Build, site: &Site) -> Result<()> {
        let changed_objects = build
            .data
            .as_ref()
            .and_then(|data| data.changed_objects())
            .ok_or(Error::MissingPayload {
                build_id: build.id,
                expected: "changedObjects",
            })?;

        tracing::info!(
            build_id = build.id,
            site_key = %site.site_key,
            objects = changed_objects.len(),
            "Applying uploaded source"
        );
        self.source
            .apply_uploaded_source(build.id, changed_objects, site)
            .await?;

        let settings = self.source.current_site_config(site).await?;
        self.sites.update_site_settings(site.id, settings).await
    }
}
