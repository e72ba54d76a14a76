//! Pluggable persistence for builds.
//!
//! The build entity only mutates its own fields; everything that reaches
//! storage goes through [`BuildStore`]. In-memory implementation for tests,
//! Postgres in the server.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Build, BuildStatus, NewBuild};

pub use memory::InMemoryBuildStore;

/// Result of trying to persist a build's RUNNING transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The build is now the site's running build.
    Claimed,
    /// Another build of the same site is already RUNNING.
    AlreadyRunning {
        /// The build holding the site.
        running_build_id: i64,
    },
    /// The stored build already left PENDING/QUEUED, e.g. a second worker
    /// claimed it first.
    AlreadyClaimed {
        /// Status of the stored row.
        status: BuildStatus,
    },
    /// The build does not exist.
    NotFound,
}

impl ClaimResult {
    /// Returns true if the claim succeeded.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Storage abstraction for build rows.
///
/// ## Running-build invariant
///
/// `count_running_for_site` is the cheap pre-check the service runs before
/// transitioning a build to RUNNING. `claim_running` is the authoritative
/// step: it must persist the RUNNING row only if the stored row is still
/// PENDING or QUEUED and no other build of the same site is RUNNING,
/// atomically with respect to other claims.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Stores a new build and returns it with its assigned id.
    async fn insert(&self, build: NewBuild) -> Result<Build>;

    /// Saves every mutable field of an existing build.
    async fn save(&self, build: &Build) -> Result<()>;

    /// Gets a build by id. Returns `None` if it does not exist.
    async fn fetch(&self, build_id: i64) -> Result<Option<Build>>;

    /// Counts RUNNING builds for a site, not counting `excluding_build_id`.
    async fn count_running_for_site(&self, site_id: i64, excluding_build_id: i64) -> Result<u64>;

    /// Saves `build` (already in RUNNING state) if its stored row is still
    /// claimable and no other build of its site is RUNNING.
    async fn claim_running(&self, build: &Build) -> Result<ClaimResult>;

    /// Every build in `status`, oldest first.
    async fn list_with_status(&self, status: BuildStatus) -> Result<Vec<Build>>;

    /// Builds of a site, newest first.
    async fn list_for_site(&self, site_id: i64, limit: usize, offset: usize)
        -> Result<Vec<Build>>;
}
