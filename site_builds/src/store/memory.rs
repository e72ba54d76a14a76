//! In-memory build store implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **Single-process only**: State is not shared across process boundaries

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{BuildStore, ClaimResult};
use crate::error::{Error, Result};
use crate::model::{Build, BuildStatus, NewBuild};

#[derive(Debug, Default)]
struct StoreState {
    next_id: i64,
    builds: BTreeMap<i64, Build>,
}

/// In-memory build store for testing.
///
/// A single `RwLock` guards all rows, which makes `claim_running` a true
/// compare-and-swap within the process.
#[derive(Debug, Default)]
pub struct InMemoryBuildStore {
    state: RwLock<StoreState>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("build store lock poisoned")
}

impl InMemoryBuildStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of builds currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn build_count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.builds.len())
    }
}

fn running_other(
    builds: &BTreeMap<i64, Build>,
    site_id: i64,
    excluding: i64,
) -> impl Iterator<Item = &Build> {
    builds.values().filter(move |b| {
        b.site_id == site_id && b.id != excluding && b.status == BuildStatus::Running
    })
}

#[async_trait]
impl BuildStore for InMemoryBuildStore {
    async fn insert(&self, build: NewBuild) -> Result<Build> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.next_id += 1;
        let build = build.into_build(state.next_id);
        state.builds.insert(build.id, build.clone());
        drop(state);
        Ok(build)
    }

    async fn save(&self, build: &Build) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(row) = state.builds.get_mut(&build.id) else {
            drop(state);
            return Err(Error::BuildNotFound { build_id: build.id });
        };
        *row = build.clone();
        drop(state);
        Ok(())
    }

    async fn fetch(&self, build_id: i64) -> Result<Option<Build>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.builds.get(&build_id).cloned())
    }

    async fn count_running_for_site(&self, site_id: i64, excluding_build_id: i64) -> Result<u64> {
        let state = self.state.read().map_err(poison_err)?;
        let count = running_other(&state.builds, site_id, excluding_build_id).count();
        Ok(count as u64)
    }

    async fn claim_running(&self, build: &Build) -> Result<ClaimResult> {
        let mut state = self.state.write().map_err(poison_err)?;

        let stored_status = state.builds.get(&build.id).map(|b| b.status);
        match stored_status {
            None => {
                drop(state);
                return Ok(ClaimResult::NotFound);
            }
            Some(status) if !matches!(status, BuildStatus::Pending | BuildStatus::Queued) => {
                drop(state);
                return Ok(ClaimResult::AlreadyClaimed { status });
            }
            Some(_) => {}
        }

        let running = running_other(&state.builds, build.site_id, build.id)
            .next()
            .map(|b| b.id);
        if let Some(running_build_id) = running {
            drop(state);
            return Ok(ClaimResult::AlreadyRunning { running_build_id });
        }

        let Some(row) = state.builds.get_mut(&build.id) else {
            drop(state);
            return Ok(ClaimResult::NotFound);
        };
        *row = build.clone();
        drop(state);
        Ok(ClaimResult::Claimed)
    }

    async fn list_with_status(&self, status: BuildStatus) -> Result<Vec<Build>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .builds
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }

    async fn list_for_site(
        &self,
        site_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Build>> {
        let state = self.state.read().map_err(poison_err)?;
        let mut builds: Vec<Build> = state
            .builds
            .values()
            .filter(|b| b.site_id == site_id)
            .cloned()
            .collect();
        drop(state);

        builds.sort_by(|a, b| b.created_date.cmp(&a.created_date).then(b.id.cmp(&a.id)));
        Ok(builds.into_iter().skip(offset).take(limit).collect())
    }
}
