//! In-memory storage roots for testing and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability
//! - **Single-process only**: Roots are not visible across process boundaries

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use super::{
    apply_writes, root_key, CommitMode, CommitSummary, ObjectWrite, RootTarget, SiteStorageManager,
    StorageRoot, StoredObject,
};
use crate::error::{Error, Result};
use crate::model::Site;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("storage root lock poisoned")
}

/// Operation counters, so tests can assert what a build touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootCalls {
    pub commits: usize,
    pub replace_alls: usize,
    pub reverts: usize,
    pub removes: usize,
}

#[derive(Debug, Default)]
struct RootState {
    /// `versions[n - 1]` holds version `n`.
    versions: Vec<BTreeMap<String, StoredObject>>,
    calls: RootCalls,
}

impl RootState {
    fn current(&self) -> BTreeMap<String, StoredObject> {
        self.versions.last().cloned().unwrap_or_default()
    }
}

/// A versioned root held entirely in memory.
#[derive(Debug)]
pub struct MemoryStorageRoot {
    key: String,
    state: RwLock<RootState>,
}

impl MemoryStorageRoot {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: RwLock::new(RootState::default()),
        }
    }

    /// Returns the operation counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn calls(&self) -> Result<RootCalls> {
        Ok(self.state.read().map_err(poison_err)?.calls)
    }

    /// Number of versions the root has ever held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn version_count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.versions.len())
    }
}

#[async_trait]
impl StorageRoot for MemoryStorageRoot {
    fn root_key(&self) -> &str {
        &self.key
    }

    async fn current_version(&self) -> Result<u32> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(u32::try_from(state.versions.len()).unwrap_or(u32::MAX))
    }

    async fn list(&self) -> Result<Vec<StoredObject>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .versions
            .last()
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.versions.last().and_then(|v| v.get(key).cloned()))
    }

    async fn commit(&self, writes: Vec<ObjectWrite>, mode: CommitMode) -> Result<CommitSummary> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.calls.commits += 1;
        if mode == CommitMode::ReplaceAll {
            state.calls.replace_alls += 1;
        }

        let (next, mut summary) = apply_writes(&state.current(), writes, mode);
        if !summary.is_noop() {
            state.versions.push(next);
        }
        summary.version = u32::try_from(state.versions.len()).unwrap_or(u32::MAX);
        drop(state);
        Ok(summary)
    }

    async fn revert_to_previous_version(&self, version: u32) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.calls.reverts += 1;

        let index = usize::try_from(version).unwrap_or(usize::MAX);
        if index == 0 || index > state.versions.len() {
            return Err(Error::VersionDoesNotExist { version });
        }
        let restored = state.versions[index - 1].clone();
        state.versions.push(restored);
        drop(state);
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.calls.removes += 1;
        state.versions.clear();
        Ok(())
    }
}

/// Hands out one [`MemoryStorageRoot`] per site and target, created on first
/// use.
#[derive(Debug, Default)]
pub struct MemoryStorageManager {
    roots: Mutex<HashMap<String, Arc<MemoryStorageRoot>>>,
}

impl MemoryStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete root, for tests that inspect counters or seed content.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn memory_root(&self, site: &Site, target: RootTarget) -> Result<Arc<MemoryStorageRoot>> {
        let key = root_key(site, target);
        let mut roots = self.roots.lock().map_err(poison_err)?;
        let root = roots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(MemoryStorageRoot::new(key)))
            .clone();
        drop(roots);
        Ok(root)
    }
}

impl SiteStorageManager for MemoryStorageManager {
    fn root(&self, site: &Site, target: RootTarget) -> Result<Arc<dyn StorageRoot>> {
        let root: Arc<dyn StorageRoot> = self.memory_root(site, target)?;
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangedObject, SiteType};
    use crate::storage::{ObjectFilter, SyncStrategy};

    fn changes(objects: &[(&str, &str)]) -> BTreeMap<String, ChangedObject> {
        objects
            .iter()
            .map(|(k, v)| ((*k).to_string(), ChangedObject::update(*k, *v)))
            .collect()
    }

    #[tokio::test]
    async fn replace_all_versions_each_effective_change() -> Result<()> {
        let root = MemoryStorageRoot::new("acme/preview");
        assert_eq!(root.current_version().await?, 0);

        let first = root.replace_all(&changes(&[("index.html", "v1")])).await?;
        assert_eq!(first.version, 1);
        assert_eq!(first.written, 1);

        let same = root.replace_all(&changes(&[("index.html", "v1")])).await?;
        assert!(same.is_noop());
        assert_eq!(root.current_version().await?, 1);

        let second = root
            .replace_all(&changes(&[("about.html", "about")]))
            .await?;
        assert_eq!(second.version, 2);
        assert_eq!(second.deleted, 1);
        assert!(root.get("index.html").await?.is_none());
        assert_eq!(root.calls()?.replace_alls, 3);
        Ok(())
    }

    #[tokio::test]
    async fn revert_copies_old_version_forward() -> Result<()> {
        let root = MemoryStorageRoot::new("acme/content");
        root.apply_changes(&[ChangedObject::update("a", "1")]).await?;
        root.apply_changes(&[ChangedObject::update("a", "2")]).await?;

        root.revert_to_previous_version(1).await?;
        assert_eq!(root.current_version().await?, 3);
        let a = root.get("a").await?.expect("object a");
        assert_eq!(a.content_str(), Some("1"));
        Ok(())
    }

    #[tokio::test]
    async fn revert_to_unknown_version_fails() {
        let root = MemoryStorageRoot::new("acme/content");
        let err = root.revert_to_previous_version(5).await.unwrap_err();
        assert!(matches!(err, Error::VersionDoesNotExist { version: 5 }));
        let err = root.revert_to_previous_version(0).await.unwrap_err();
        assert!(matches!(err, Error::VersionDoesNotExist { version: 0 }));
    }

    #[tokio::test]
    async fn synchronise_mirror_only_touches_filtered_keys() -> Result<()> {
        let source = MemoryStorageRoot::new("acme/content");
        source
            .apply_changes(&[
                ChangedObject::update("source/index.html", "home"),
                ChangedObject::update("scratch/tmp", "x"),
            ])
            .await?;

        let target = MemoryStorageRoot::new("acme/published-1");
        target
            .apply_changes(&[
                ChangedObject::update("source/stale.html", "old"),
                ChangedObject::update("keep.txt", "kept"),
            ])
            .await?;

        target
            .synchronise(&source, &ObjectFilter::prefix("source/"), SyncStrategy::Mirror)
            .await?;

        let keys: Vec<String> = target.list().await?.into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["keep.txt", "source/index.html"]);
        Ok(())
    }

    #[tokio::test]
    async fn manager_reuses_roots_per_target() -> Result<()> {
        let manager = MemoryStorageManager::new();
        let site = Site::new(1, 1, "acme", SiteType::Plain);
        manager
            .preview_root(&site)?
            .apply_changes(&[ChangedObject::update("a", "1")])
            .await?;
        assert_eq!(manager.memory_root(&site, RootTarget::Preview)?.version_count()?, 1);
        assert_eq!(manager.production_root(&site)?.current_version().await?, 0);
        assert_eq!(manager.published_version_root(&site, 2)?.root_key(), "acme/published-2");
        Ok(())
    }

    #[tokio::test]
    async fn remove_clears_all_versions() -> Result<()> {
        let root = MemoryStorageRoot::new("acme/processing");
        root.apply_changes(&[ChangedObject::update("a", "1")]).await?;
        root.remove().await?;
        assert!(root.list().await?.is_empty());
        assert_eq!(root.calls()?.removes, 1);
        Ok(())
    }
}
