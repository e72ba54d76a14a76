//! Build lifecycle engine for static site hosting.
//!
//! A [`Build`](model::Build) is one attempt to deploy a site's content. The
//! [`BuildService`](service::BuildService) creates, queues and runs builds,
//! guaranteeing at most one RUNNING build per site, and dispatches the
//! deployment work to a [`BuildRunner`](runner::BuildRunner) chosen by build
//! type. Runners read and write versioned [`StorageRoot`](storage::StorageRoot)s.
//!
//! Collaborators (sites, persistence, queue, notifications, storage) are
//! traits with in-memory implementations; the server crate supplies the
//! production ones.

pub mod error;
pub mod metrics;
pub mod model;
pub mod notification;
pub mod processor;
pub mod queue;
pub mod runner;
pub mod security;
pub mod service;
pub mod sites;
pub mod source;
pub mod storage;
pub mod store;

pub use error::{Error, Result};
pub use service::BuildService;
