//! Content snapshot for dynamic sites.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::entities::ENTITIES_SNAPSHOT;
use super::{emit_json, file_json, DeployFiles, DeploymentProcessor, ProcessingContext};
use crate::error::{Error, Result};

/// Source folder holding `content/<type>/<id>.json` items.
pub const CONTENT_DIR: &str = "content/";

/// Generated snapshot of all content items, grouped by entity type.
pub const CONTENT_SNAPSHOT: &str = "_meta/content.json";

/// Collects content items into [`CONTENT_SNAPSHOT`], checking each against
/// the entity definitions already in the change set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSnapshotProcessor;

#[async_trait]
impl DeploymentProcessor for ContentSnapshotProcessor {
    fn name(&self) -> &'static str {
        "content-snapshot"
    }

    async fn process(&self, ctx: &ProcessingContext<'_>, files: &mut DeployFiles) -> Result<()> {
        if ctx.site.is_plain() {
            return Ok(());
        }

        let entities = match files.get(ENTITIES_SNAPSHOT) {
            Some(snapshot) => file_json(snapshot).await?,
            None => {
                return Err(Error::runner(format!(
                    "content snapshot requires {ENTITIES_SNAPSHOT}, run entity definitions first"
                )))
            }
        };

        let mut by_type: Map<String, Value> = Map::new();
        for (key, change) in files.iter() {
            if change.is_delete() {
                continue;
            }
            let Some((type_name, item_file)) = key
                .strip_prefix(CONTENT_DIR)
                .and_then(|rest| rest.split_once('/'))
            else {
                continue;
            };
            let Some(item_id) = item_file.strip_suffix(".json") else {
                continue;
            };
            if entities.get(type_name).is_none() {
                return Err(Error::runner(format!(
                    "{key} references unknown entity type {type_name}"
                )));
            }

            let mut item = file_json(change).await?;
            if let Value::Object(fields) = &mut item {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::String(item_id.to_string()));
            }
            if let Value::Array(items) = by_type
                .entry(type_name.to_string())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                items.push(item);
            }
        }

        tracing::debug!(
            build_id = ctx.build.id,
            content_types = by_type.len(),
            "Generated content snapshot"
        );
        emit_json(ctx, files, CONTENT_SNAPSHOT, &Value::Object(by_type)).await
    }
}
