//! Entity definition snapshot for dynamic sites.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{emit_json, file_json, DeployFiles, DeploymentProcessor, ProcessingContext, META_PREFIX};
use crate::error::{Error, Result};

/// Source folder holding one JSON definition per entity type.
pub const ENTITIES_DIR: &str = "entities/";

/// Generated snapshot of all entity definitions, keyed by type name.
pub const ENTITIES_SNAPSHOT: &str = "_meta/entities.json";

/// Collects `entities/<type>.json` into [`ENTITIES_SNAPSHOT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityDefinitionProcessor;

#[async_trait]
impl DeploymentProcessor for EntityDefinitionProcessor {
    fn name(&self) -> &'static str {
        "entity-definitions"
    }

    async fn process(&self, ctx: &ProcessingContext<'_>, files: &mut DeployFiles) -> Result<()> {
        if ctx.site.is_plain() {
            return Ok(());
        }

        let mut definitions = Map::new();
        for (key, change) in files.iter() {
            if change.is_delete() || key.starts_with(META_PREFIX) {
                continue;
            }
            let Some(type_name) = key
                .strip_prefix(ENTITIES_DIR)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if type_name.contains('/') {
                continue;
            }
            let definition = file_json(change).await?;
            if !definition.is_object() {
                return Err(Error::runner(format!("entity definition {key} must be a JSON object")));
            }
            definitions.insert(type_name.to_string(), definition);
        }

        tracing::debug!(
            build_id = ctx.build.id,
            entity_types = definitions.len(),
            "Generated entity definition snapshot"
        );
        emit_json(ctx, files, ENTITIES_SNAPSHOT, &Value::Object(definitions)).await
    }
}
