//! Access to a site's authored source.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ChangedObject, Site, SiteSettings};
use crate::storage::SiteStorageManager;

/// Prefix under which authored files live in the content root.
pub const SOURCE_PREFIX: &str = "source/";

/// Site configuration file, relative to the source prefix.
pub const SITE_CONFIG_FILE: &str = "site.json";

const APPLIED_MARKER_PREFIX: &str = ".applied/";

/// The source collaborator.
#[async_trait]
pub trait SourceService: Send + Sync {
    /// The complete set of files a deployment of the site should contain.
    async fn current_deployment_changed_files(&self, site: &Site) -> Result<Vec<ChangedObject>>;

    /// Applies uploaded changes to the site's content. Replaying the same
    /// `build_id` is a no-op.
    async fn apply_uploaded_source(
        &self,
        build_id: i64,
        changed_objects: &[ChangedObject],
        site: &Site,
    ) -> Result<()>;

    /// Site settings as currently defined by the content.
    async fn current_site_config(&self, site: &Site) -> Result<SiteSettings>;
}

/// [`SourceService`] reading and writing the `source/` area of each site's
/// content root.
#[derive(Clone)]
pub struct ContentSourceService {
    storage: Arc<dyn SiteStorageManager>,
}

impl ContentSourceService {
    pub fn new(storage: Arc<dyn SiteStorageManager>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SourceService for ContentSourceService {
    async fn current_deployment_changed_files(&self, site: &Site) -> Result<Vec<ChangedObject>> {
        let content = self.storage.content_root(site)?;
        Ok(content
            .list()
            .await?
            .into_iter()
            .filter_map(|obj| {
                let key = obj.key.strip_prefix(SOURCE_PREFIX)?.to_string();
                Some(ChangedObject::update(key, obj.content).with_hash(obj.hash))
            })
            .collect())
    }

    async fn apply_uploaded_source(
        &self,
        build_id: i64,
        changed_objects: &[ChangedObject],
        site: &Site,
    ) -> Result<()> {
        let content = self.storage.content_root(site)?;
        let marker = format!("{APPLIED_MARKER_PREFIX}{build_id}");
        if content.get(&marker).await?.is_some() {
            tracing::info!(build_id, site_key = %site.site_key, "Upload already applied, skipping");
            return Ok(());
        }

        let mut changes: Vec<ChangedObject> = changed_objects
            .iter()
            .map(|c| c.with_key(format!("{SOURCE_PREFIX}{}", c.object_key())))
            .collect();
        changes.push(ChangedObject::update(marker, build_id.to_string()));

        let summary = content.apply_changes(&changes).await?;
        tracing::info!(
            build_id,
            site_key = %site.site_key,
            version = summary.version,
            written = summary.written,
            deleted = summary.deleted,
            "Applied uploaded source"
        );
        Ok(())
    }

    async fn current_site_config(&self, site: &Site) -> Result<SiteSettings> {
        let content = self.storage.content_root(site)?;
        match content.get(&format!("{SOURCE_PREFIX}{SITE_CONFIG_FILE}")).await? {
            Some(obj) => Ok(serde_json::from_slice(&obj.content)?),
            None => Ok(SiteSettings::default()),
        }
    }
}
