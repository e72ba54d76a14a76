//! Filesystem-backed storage roots.
//!
//! Layout under the manager's base directory:
//!
//! ```text
//! <site_key>/<target>/CURRENT      current version number
//! <site_key>/<target>/v1/...       objects of version 1, keyed by relative path
//! <site_key>/<target>/v2/...
//! ```
//!
//! Each effective commit writes a complete new version directory and then
//! swaps `CURRENT`, so readers never observe a half-written version.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use super::{
    apply_writes, root_key, CommitMode, CommitSummary, ObjectWrite, RootTarget, SiteStorageManager,
    StorageRoot, StoredObject,
};
use crate::error::{Error, Result};
use crate::model::Site;

const CURRENT_FILE: &str = "CURRENT";

fn version_dir(root_dir: &Path, version: u32) -> PathBuf {
    root_dir.join(format!("v{version}"))
}

/// Maps an object key onto a path inside `dir`, refusing keys that would
/// escape it.
fn object_path(dir: &Path, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key);
    let valid = !key.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(Error::storage(format!("invalid object key: {key:?}")));
    }
    Ok(dir.join(relative))
}

/// Lists every file below `dir` as `(key, path)` pairs.
async fn walk(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(dir) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((key, path));
            }
        }
    }
    files.sort();
    Ok(files)
}

/// A versioned root stored as directories on local disk.
#[derive(Debug)]
pub struct FsStorageRoot {
    key: String,
    dir: PathBuf,
    /// Serialises writers within this process.
    write_lock: AsyncMutex<()>,
}

impl FsStorageRoot {
    pub fn new(key: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            dir: dir.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    async fn read_current(&self) -> Result<u32> {
        match tokio::fs::read_to_string(self.dir.join(CURRENT_FILE)).await {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::storage(format!("corrupt version marker in {}", self.key))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_version(&self, version: u32) -> Result<BTreeMap<String, StoredObject>> {
        let mut objects = BTreeMap::new();
        if version == 0 {
            return Ok(objects);
        }
        for (key, path) in walk(&version_dir(&self.dir, version)).await? {
            let content = tokio::fs::read(&path).await?;
            objects.insert(key.clone(), StoredObject::new(key, content));
        }
        Ok(objects)
    }

    /// Writes `objects` as version `version` and makes it current.
    async fn write_version(
        &self,
        version: u32,
        objects: &BTreeMap<String, StoredObject>,
    ) -> Result<()> {
        let dir = version_dir(&self.dir, version);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        for obj in objects.values() {
            let path = object_path(&dir, &obj.key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &obj.content).await?;
        }

        let marker = self.dir.join(format!("{CURRENT_FILE}.tmp"));
        tokio::fs::write(&marker, version.to_string()).await?;
        tokio::fs::rename(&marker, self.dir.join(CURRENT_FILE)).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageRoot for FsStorageRoot {
    fn root_key(&self) -> &str {
        &self.key
    }

    async fn current_version(&self) -> Result<u32> {
        self.read_current().await
    }

    async fn list(&self) -> Result<Vec<StoredObject>> {
        let current = self.read_current().await?;
        Ok(self.read_version(current).await?.into_values().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let current = self.read_current().await?;
        if current == 0 {
            return Ok(None);
        }
        let path = object_path(&version_dir(&self.dir, current), key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(StoredObject::new(key, content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&self, writes: Vec<ObjectWrite>, mode: CommitMode) -> Result<CommitSummary> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_current().await?;
        let existing = self.read_version(current).await?;

        let (next, mut summary) = apply_writes(&existing, writes, mode);
        if summary.is_noop() {
            summary.version = current;
            return Ok(summary);
        }
        self.write_version(current + 1, &next).await?;
        summary.version = current + 1;
        tracing::debug!(
            root = %self.key,
            version = summary.version,
            written = summary.written,
            deleted = summary.deleted,
            "Committed storage root"
        );
        Ok(summary)
    }

    async fn revert_to_previous_version(&self, version: u32) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_current().await?;
        if version == 0
            || version > current
            || !tokio::fs::try_exists(version_dir(&self.dir, version)).await?
        {
            return Err(Error::VersionDoesNotExist { version });
        }
        let restored = self.read_version(version).await?;
        self.write_version(current + 1, &restored).await?;
        tracing::info!(
            root = %self.key,
            version,
            new_version = current + 1,
            "Reverted storage root"
        );
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("storage manager lock poisoned")
}

/// Hands out [`FsStorageRoot`]s below a base directory.
#[derive(Debug)]
pub struct FsStorageManager {
    base_dir: PathBuf,
    roots: Mutex<HashMap<String, Arc<FsStorageRoot>>>,
}

impl FsStorageManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            roots: Mutex::new(HashMap::new()),
        }
    }
}

impl SiteStorageManager for FsStorageManager {
    fn root(&self, site: &Site, target: RootTarget) -> Result<Arc<dyn StorageRoot>> {
        let key = root_key(site, target);
        let dir = object_path(&self.base_dir, &key)?;
        let mut roots = self.roots.lock().map_err(poison_err)?;
        let root = roots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(FsStorageRoot::new(key, dir)))
            .clone();
        drop(roots);
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangedObject, SiteType};

    #[tokio::test]
    async fn commits_and_reverts_on_disk() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let manager = FsStorageManager::new(tmp.path());
        let site = Site::new(1, 1, "acme", SiteType::Plain);
        let root = manager.content_root(&site)?;

        root.apply_changes(&[ChangedObject::update("source/index.html", "one")])
            .await?;
        root.apply_changes(&[
            ChangedObject::update("source/index.html", "two"),
            ChangedObject::update("source/css/site.css", "body{}"),
        ])
        .await?;
        assert_eq!(root.current_version().await?, 2);
        assert!(tmp.path().join("acme/content/v2/source/css/site.css").exists());

        root.revert_to_previous_version(1).await?;
        assert_eq!(root.current_version().await?, 3);
        let keys: Vec<String> = root.list().await?.into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["source/index.html"]);
        let index = root.get("source/index.html").await?.expect("index");
        assert_eq!(index.content_str(), Some("one"));

        let err = root.revert_to_previous_version(9).await.unwrap_err();
        assert!(matches!(err, Error::VersionDoesNotExist { version: 9 }));
        Ok(())
    }

    #[tokio::test]
    async fn file_backed_changes_are_read_from_disk() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let upload = tmp.path().join("upload.bin");
        tokio::fs::write(&upload, [0u8, 159, 146, 150]).await?;

        let root = FsStorageRoot::new("acme/preview", tmp.path().join("preview"));
        root.apply_changes(&[ChangedObject::update_from_file("logo.png", &upload)])
            .await?;
        let logo = root.get("logo.png").await?.expect("logo");
        assert_eq!(logo.content, vec![0u8, 159, 146, 150]);
        assert!(logo.content_str().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_escaping_keys() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = FsStorageRoot::new("acme/preview", tmp.path().join("preview"));
        let err = root
            .apply_changes(&[ChangedObject::update("../outside", "x")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid object key"));
        Ok(())
    }

    #[tokio::test]
    async fn remove_is_idempotent() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = FsStorageRoot::new("acme/processing", tmp.path().join("processing"));
        root.remove().await?;
        root.apply_changes(&[ChangedObject::update("a", "1")]).await?;
        root.remove().await?;
        assert_eq!(root.current_version().await?, 0);
        Ok(())
    }
}
