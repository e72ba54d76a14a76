//! A single file-level change travelling from source diffing into storage roots.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What happens to the object at `object_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Update,
    Delete,
}

/// Immutable description of one changed object.
///
/// Content is carried inline (`object_content`) or by reference to a file on
/// local disk (`local_filename`). `content_hash` lets a storage root skip
/// writes whose content it already holds without reading the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedObject {
    object_key: String,
    change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_filename: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "md5Hash")]
    content_hash: Option<String>,
}

impl ChangedObject {
    /// An update carrying its content inline.
    #[must_use]
    pub fn update(object_key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            object_key: object_key.into(),
            change_type: ChangeType::Update,
            object_content: Some(content.into()),
            local_filename: None,
            content_hash: None,
        }
    }

    /// An update whose content is read from a local file when applied.
    #[must_use]
    pub fn update_from_file(
        object_key: impl Into<String>,
        local_filename: impl Into<PathBuf>,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            change_type: ChangeType::Update,
            object_content: None,
            local_filename: Some(local_filename.into()),
            content_hash: None,
        }
    }

    /// A deletion of `object_key`.
    #[must_use]
    pub fn delete(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            change_type: ChangeType::Delete,
            object_content: None,
            local_filename: None,
            content_hash: None,
        }
    }

    /// Returns a copy carrying a known content hash.
    #[must_use]
    pub fn with_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = Some(content_hash.into());
        self
    }

    /// Returns a copy of this change re-rooted under a different key.
    #[must_use]
    pub fn with_key(&self, object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            ..self.clone()
        }
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn object_content(&self) -> Option<&[u8]> {
        self.object_content.as_deref()
    }

    pub fn local_filename(&self) -> Option<&Path> {
        self.local_filename.as_deref()
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn is_delete(&self) -> bool {
        self.change_type == ChangeType::Delete
    }
}
