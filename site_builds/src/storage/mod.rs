//! Versioned object containers holding a site's content and deployments.
//!
//! Every site owns a handful of roots, looked up through a
//! [`SiteStorageManager`] by [`RootTarget`]:
//!
//! - `content`: uploaded source, authoritative for the site
//! - `preview` / `production`: what the two serving targets deliver
//! - `processing`: scratch space for deployment processors, cleared per build
//! - `published-N`: frozen snapshot of content taken by the Nth publish
//!
//! A root is versioned: every effective commit produces a new numbered
//! version, and [`StorageRoot::revert_to_previous_version`] copies an older
//! version forward as the newest one.

pub mod fs;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::{ChangeType, ChangedObject, Site};

pub use fs::{FsStorageManager, FsStorageRoot};
pub use memory::{MemoryStorageManager, MemoryStorageRoot};

/// Hex SHA-256 of object content. All roots compare content by this digest.
pub fn hash_content(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// An object as held by a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub content: Vec<u8>,
    pub hash: String,
}

impl StoredObject {
    pub fn new(key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            key: key.into(),
            hash: hash_content(&content),
            content,
        }
    }

    /// Content as UTF-8 text, if it is text.
    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// One resolved mutation handed to [`StorageRoot::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectWrite {
    Put(StoredObject),
    Delete(String),
}

impl ObjectWrite {
    pub fn key(&self) -> &str {
        match self {
            Self::Put(obj) => &obj.key,
            Self::Delete(key) => key,
        }
    }
}

/// How a commit relates to what the root already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Apply the writes on top of the current contents.
    Apply,
    /// The puts become the complete contents; anything else is dropped.
    ReplaceAll,
}

/// Outcome of a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Version current after the commit.
    pub version: u32,
    pub written: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl CommitSummary {
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.deleted == 0
    }
}

/// How [`StorageRoot::synchronise`] treats objects missing from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Copy matching source objects in; leave everything else alone.
    Merge,
    /// Also delete matching target objects the source does not have.
    Mirror,
}

/// Key filter for synchronisation. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter(Option<Regex>);

impl ObjectFilter {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn pattern(expr: &str) -> Result<Self> {
        Regex::new(expr)
            .map(|re| Self(Some(re)))
            .map_err(|e| Error::storage_with_source(format!("invalid object filter {expr:?}"), e))
    }

    /// Objects whose key starts with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self(Regex::new(&format!("^{}", regex::escape(prefix))).ok())
    }

    pub fn matches(&self, key: &str) -> bool {
        self.0.as_ref().map_or(true, |re| re.is_match(key))
    }
}

/// Resolves a change into a write, reading file-backed content from disk.
///
/// Returns `None` when `existing` already holds content with the change's
/// declared hash, so the content never has to be read.
pub async fn resolve_change(
    change: &ChangedObject,
    existing: Option<&StoredObject>,
) -> Result<Option<ObjectWrite>> {
    let key = change.object_key().to_string();
    if change.change_type() == ChangeType::Delete {
        return Ok(Some(ObjectWrite::Delete(key)));
    }

    if let (Some(declared), Some(current)) = (change.content_hash(), existing) {
        if declared == current.hash {
            return Ok(None);
        }
    }

    let content = match (change.object_content(), change.local_filename()) {
        (Some(content), _) => content.to_vec(),
        (None, Some(path)) => tokio::fs::read(path).await.map_err(|e| {
            Error::storage_with_source(format!("cannot read {} for {key}", path.display()), e)
        })?,
        (None, None) => {
            return Err(Error::storage(format!("update for {key} carries no content")));
        }
    };
    Ok(Some(ObjectWrite::Put(StoredObject::new(key, content))))
}

/// Applies `writes` to `current`, returning the new contents and a summary
/// (with `version` left at 0 for the caller to fill in).
pub(crate) fn apply_writes(
    current: &BTreeMap<String, StoredObject>,
    writes: Vec<ObjectWrite>,
    mode: CommitMode,
) -> (BTreeMap<String, StoredObject>, CommitSummary) {
    let mut summary = CommitSummary::default();
    let mut next = match mode {
        CommitMode::Apply => current.clone(),
        CommitMode::ReplaceAll => BTreeMap::new(),
    };

    let mut touched = BTreeSet::new();
    for write in writes {
        touched.insert(write.key().to_string());
        match write {
            ObjectWrite::Put(obj) => {
                if current.get(&obj.key).is_some_and(|old| old.hash == obj.hash) {
                    summary.unchanged += 1;
                } else {
                    summary.written += 1;
                }
                next.insert(obj.key.clone(), obj);
            }
            ObjectWrite::Delete(key) => {
                if next.remove(&key).is_some()
                    || (mode == CommitMode::ReplaceAll && current.contains_key(&key))
                {
                    summary.deleted += 1;
                }
            }
        }
    }

    if mode == CommitMode::ReplaceAll {
        summary.deleted += current.keys().filter(|k| !touched.contains(*k)).count();
    }
    (next, summary)
}

/// A versioned, addressable object container.
#[async_trait]
pub trait StorageRoot: Send + Sync {
    /// Stable identifier, `<site_key>/<target>`.
    fn root_key(&self) -> &str;

    /// Number of the current version; 0 for a root never written.
    async fn current_version(&self) -> Result<u32>;

    /// All objects in the current version, ordered by key.
    async fn list(&self) -> Result<Vec<StoredObject>>;

    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Applies resolved writes atomically as one new version. A commit that
    /// changes nothing does not create a version.
    async fn commit(&self, writes: Vec<ObjectWrite>, mode: CommitMode) -> Result<CommitSummary>;

    /// Makes a copy of `version` the newest version.
    ///
    /// Fails with [`Error::VersionDoesNotExist`] if the root never had it.
    async fn revert_to_previous_version(&self, version: u32) -> Result<()>;

    /// Drops all versions. Used for transient roots.
    async fn remove(&self) -> Result<()>;

    /// Applies incremental changes on top of the current contents.
    async fn apply_changes(&self, changes: &[ChangedObject]) -> Result<CommitSummary> {
        let mut writes = Vec::with_capacity(changes.len());
        for change in changes {
            let existing = self.get(change.object_key()).await?;
            if let Some(write) = resolve_change(change, existing.as_ref()).await? {
                writes.push(write);
            }
        }
        self.commit(writes, CommitMode::Apply).await
    }

    /// Makes the root hold exactly the update entries of `objects`.
    async fn replace_all(
        &self,
        objects: &BTreeMap<String, ChangedObject>,
    ) -> Result<CommitSummary> {
        let current: BTreeMap<String, StoredObject> = self
            .list()
            .await?
            .into_iter()
            .map(|o| (o.key.clone(), o))
            .collect();

        let mut writes = Vec::with_capacity(objects.len());
        for (key, change) in objects {
            if change.is_delete() {
                continue;
            }
            let change = if change.object_key() == key {
                change.clone()
            } else {
                change.with_key(key.clone())
            };
            match resolve_change(&change, current.get(key)).await? {
                Some(write) => writes.push(write),
                None => {
                    if let Some(existing) = current.get(key) {
                        writes.push(ObjectWrite::Put(existing.clone()));
                    }
                }
            }
        }
        self.commit(writes, CommitMode::ReplaceAll).await
    }

    /// Copies objects matching `filter` in from `source`.
    async fn synchronise(
        &self,
        source: &dyn StorageRoot,
        filter: &ObjectFilter,
        strategy: SyncStrategy,
    ) -> Result<CommitSummary> {
        let incoming: Vec<StoredObject> = source
            .list()
            .await?
            .into_iter()
            .filter(|o| filter.matches(&o.key))
            .collect();
        let incoming_keys: BTreeSet<&str> = incoming.iter().map(|o| o.key.as_str()).collect();

        let mut writes = Vec::new();
        if strategy == SyncStrategy::Mirror {
            for existing in self.list().await? {
                if filter.matches(&existing.key) && !incoming_keys.contains(existing.key.as_str()) {
                    writes.push(ObjectWrite::Delete(existing.key));
                }
            }
        }
        writes.extend(incoming.into_iter().map(ObjectWrite::Put));
        self.commit(writes, CommitMode::Apply).await
    }
}

/// The areas of a site a build can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootTarget {
    Preview,
    Production,
    Processing,
    Content,
    Published(u32),
}

impl fmt::Display for RootTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preview => f.write_str("preview"),
            Self::Production => f.write_str("production"),
            Self::Processing => f.write_str("processing"),
            Self::Content => f.write_str("content"),
            Self::Published(version) => write!(f, "published-{version}"),
        }
    }
}

/// Key of the root for `target` of `site`.
pub fn root_key(site: &Site, target: RootTarget) -> String {
    format!("{}/{}", site.site_key, target)
}

/// Looks up a site's storage roots.
pub trait SiteStorageManager: Send + Sync {
    fn root(&self, site: &Site, target: RootTarget) -> Result<Arc<dyn StorageRoot>>;

    fn preview_root(&self, site: &Site) -> Result<Arc<dyn StorageRoot>> {
        self.root(site, RootTarget::Preview)
    }

    fn production_root(&self, site: &Site) -> Result<Arc<dyn StorageRoot>> {
        self.root(site, RootTarget::Production)
    }

    fn processing_root(&self, site: &Site) -> Result<Arc<dyn StorageRoot>> {
        self.root(site, RootTarget::Processing)
    }

    fn content_root(&self, site: &Site) -> Result<Arc<dyn StorageRoot>> {
        self.root(site, RootTarget::Content)
    }

    fn published_version_root(&self, site: &Site, version: u32) -> Result<Arc<dyn StorageRoot>> {
        self.root(site, RootTarget::Published(version))
    }
}
