//! Deploys the site's current source to the preview or production root.

use std::sync::Arc;

use async_trait::async_trait;

use super::BuildRunner;
use crate::error::{Error, Result};
use crate::model::{Build, BuildType, Site};
use crate::processor::{DeployFiles, DeploymentProcessor, ProcessingContext};
use crate::source::{SourceService, SOURCE_PREFIX};
use crate::storage::{ObjectFilter, RootTarget, SiteStorageManager, StorageRoot, SyncStrategy};

/// Handles CURRENT, PREVIEW and PUBLISH builds.
pub struct CurrentBuildRunner {
    storage: Arc<dyn SiteStorageManager>,
    source: Arc<dyn SourceService>,
    processors: Vec<Arc<dyn DeploymentProcessor>>,
}

impl CurrentBuildRunner {
    pub fn new(
        storage: Arc<dyn SiteStorageManager>,
        source: Arc<dyn SourceService>,
        processors: Vec<Arc<dyn DeploymentProcessor>>,
    ) -> Self {
        Self {
            storage,
            source,
            processors,
        }
    }

    fn target(build: &Build) -> Result<RootTarget> {
        match build.build_type {
            BuildType::Publish => Ok(RootTarget::Production),
            BuildType::Preview | BuildType::Current => Ok(RootTarget::Preview),
            other => Err(Error::NoRunner { build_type: other }),
        }
    }

    async fn deploy(
        &self,
        build: &Build,
        site: &Site,
        processing_root: Arc<dyn StorageRoot>,
    ) -> Result<()> {
        let target = Self::target(build)?;
        let target_root = self.storage.root(site, target)?;

        let mut files: DeployFiles = self
            .source
            .current_deployment_changed_files(site)
            .await?
            .into_iter()
            .map(|change| (change.object_key().to_string(), change))
            .collect();

        if files.is_empty() {
            tracing::info!(
                build_id = build.id,
                site_key = %site.site_key,
                %target,
                "No deployable files, nothing to replace"
            );
            return Ok(());
        }

        let ctx = ProcessingContext {
            site,
            build,
            processing_root,
        };
        for processor in &self.processors {
            processor.process(&ctx, &mut files).await?;
            tracing::debug!(
                build_id = build.id,
                processor = processor.name(),
                files = files.len(),
                "Processor finished"
            );
        }

        let summary = target_root.replace_all(&files).await?;
        crate::metrics::objects_deployed(&target.to_string(), summary.written);
        tracing::info!(
            build_id = build.id,
            site_key = %site.site_key,
            %target,
            version = summary.version,
            written = summary.written,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            "Deployed site content"
        );
        Ok(())
    }

    /// Freezes the content root's source into the next publish snapshot.
    async fn snapshot_published_version(&self, build: &Build, site: &Site) -> Result<()> {
        let version = site.published_version + 1;
        let content = self.storage.content_root(site)?;
        let snapshot = self.storage.published_version_root(site, version)?;
        let summary = snapshot
            .synchronise(
                content.as_ref(),
                &ObjectFilter::prefix(SOURCE_PREFIX),
                SyncStrategy::Mirror,
            )
            .await?;
        tracing::info!(
            build_id = build.id,
            site_key = %site.site_key,
            published_version = version,
            objects = summary.written + summary.unchanged,
            "Created publish snapshot"
        );
        Ok(())
    }
}

#[async_trait]
impl BuildRunner for CurrentBuildRunner {
    fn name(&self) -> &'static str {
        "current"
    }

    async fn run_build(&self, build: &Build, site: &Site) -> Result<()> {
        let processing_root = self.storage.processing_root(site)?;
        let deployed = self.deploy(build, site, processing_root.clone()).await;
        let cleaned = processing_root.remove().await;
        match (deployed, cleaned) {
            (Err(e), Err(cleanup)) => {
                tracing::warn!(
                    build_id = build.id,
                    site_key = %site.site_key,
                    error = %cleanup,
                    "Failed to clear processing root"
                );
                return Err(e);
            }
            (deployed, cleaned) => {
                deployed?;
                cleaned?;
            }
        }

        if build.build_type == BuildType::Publish && !site.is_plain() {
            self.snapshot_published_version(build, site).await?;
        }
        Ok(())
    }
}
