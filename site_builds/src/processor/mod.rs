//! Deployment processors: transformations applied to a site's deploy files
//! before they are written to a serving root.
//!
//! Processors run as a fixed chain. Order matters: the content snapshot reads
//! the entity definitions the metadata processor adds to the change set.

pub mod content;
pub mod entities;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Build, ChangedObject, Site};
use crate::storage::{resolve_change, ObjectWrite, StorageRoot};

pub use content::ContentSnapshotProcessor;
pub use entities::EntityDefinitionProcessor;

/// Deploy files keyed by object key.
pub type DeployFiles = BTreeMap<String, ChangedObject>;

/// Prefix for generated metadata objects.
pub const META_PREFIX: &str = "_meta/";

/// What a processor may look at and write to.
pub struct ProcessingContext<'a> {
    pub site: &'a Site,
    pub build: &'a Build,
    /// Scratch root, cleared once the build's deployment is written.
    pub processing_root: Arc<dyn StorageRoot>,
}

#[async_trait]
pub trait DeploymentProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// May add or replace entries in `files`.
    async fn process(&self, ctx: &ProcessingContext<'_>, files: &mut DeployFiles) -> Result<()>;
}

/// The standard chain: metadata first, then content.
pub fn standard_chain() -> Vec<Arc<dyn DeploymentProcessor>> {
    vec![
        Arc::new(EntityDefinitionProcessor),
        Arc::new(ContentSnapshotProcessor),
    ]
}

/// Reads a deploy file's bytes, inline or from disk.
pub(crate) async fn file_content(change: &ChangedObject) -> Result<Vec<u8>> {
    match resolve_change(change, None).await? {
        Some(ObjectWrite::Put(obj)) => Ok(obj.content),
        _ => Err(Error::runner(format!("{} has no content", change.object_key()))),
    }
}

/// Parses a deploy file as JSON, naming the file on failure.
pub(crate) async fn file_json(change: &ChangedObject) -> Result<serde_json::Value> {
    let content = file_content(change).await?;
    serde_json::from_slice(&content)
        .map_err(|e| Error::runner(format!("{} is not valid JSON: {e}", change.object_key())))
}

/// Adds a generated JSON document to the change set and mirrors it into the
/// processing root.
pub(crate) async fn emit_json(
    ctx: &ProcessingContext<'_>,
    files: &mut DeployFiles,
    key: &str,
    document: &serde_json::Value,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let change = ChangedObject::update(key, bytes);
    ctx.processing_root
        .apply_changes(std::slice::from_ref(&change))
        .await?;
    files.insert(key.to_string(), change);
    Ok(())
}
