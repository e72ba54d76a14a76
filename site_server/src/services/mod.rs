//! Production collaborators for the build engine.

pub mod build_store;
pub mod notifier;
pub mod signature;
pub mod site_service;
pub mod task_queue;
pub mod worker;

use statichost_builds::Error;

pub use build_store::PgBuildStore;
pub use notifier::HttpNotificationService;
pub use site_service::PgSiteService;
pub use task_queue::{HttpTaskQueue, LocalTaskQueue};

pub(crate) fn db_err(e: diesel::result::Error) -> Error {
    Error::storage_with_source("database query failed", e)
}

pub(crate) fn pool_err(e: diesel_async::pooled_connection::deadpool::PoolError) -> Error {
    Error::storage_with_source("database pool unavailable", e)
}

/// Clamps a page size or offset into a SQL bigint.
pub(crate) fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
