//! Error types for the build lifecycle engine.

use crate::model::build::{BuildStatus, BuildType};

/// The result type used throughout statichost-builds.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating, queueing, or running builds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No site is registered under the given key.
    #[error("site not found: {site_key}")]
    SiteNotFound {
        /// The site key that was looked up.
        site_key: String,
    },

    /// The site exists but is suspended and cannot be built.
    #[error("site is not active: {site_key}")]
    SiteNotActive {
        /// The site key that was looked up.
        site_key: String,
    },

    /// A build was not found.
    #[error("build not found: {build_id}")]
    BuildNotFound {
        /// The build id that was not found.
        build_id: i64,
    },

    /// Another build is already running for the same site.
    ///
    /// This is a rejected attempt, not a failed build: the rejected build keeps
    /// its prior status and the caller decides whether to try again later.
    #[error("a build is already running for site {site_key} (rejected build {build_id})")]
    ConcurrentBuild {
        /// Key of the site that is busy.
        site_key: String,
        /// The build whose run was rejected.
        build_id: i64,
    },

    /// A version revert targeted a version the storage root does not hold.
    #[error("version {version} does not exist")]
    VersionDoesNotExist {
        /// The requested version.
        version: u32,
    },

    /// A status change would move a build backwards or out of a terminal state.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// The current status.
        from: BuildStatus,
        /// The attempted status.
        to: BuildStatus,
    },

    /// Builds can only be created as PENDING, QUEUED or RUNNING.
    #[error("builds cannot be created with status {status}")]
    InvalidInitialStatus {
        /// The requested initial status.
        status: BuildStatus,
    },

    /// The build payload is absent or does not match what the runner needs.
    #[error("build {build_id} has no {expected} payload")]
    MissingPayload {
        /// The build being run.
        build_id: i64,
        /// Which payload kind the runner expected.
        expected: &'static str,
    },

    /// No runner is registered for a build type.
    #[error("no build runner registered for {build_type}")]
    NoRunner {
        /// The unhandled build type.
        build_type: BuildType,
    },

    /// Deployment work failed.
    ///
    /// Displays as the bare message so it can be recorded verbatim as the
    /// build's failure message.
    #[error("{message}")]
    Runner {
        /// Human readable failure description.
        message: String,
    },

    /// A storage root or build store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Submitting a task to the queue transport failed.
    #[error("queue error: {message}")]
    Queue {
        /// Description of the queue failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Delivering a build notification failed.
    #[error("notification error: {message}")]
    Notification {
        /// Description of the delivery failure.
        message: String,
    },

    /// A payload or object could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new queue error.
    #[must_use]
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new queue error with a source.
    #[must_use]
    pub fn queue_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Queue {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a runner failure carrying a plain message.
    #[must_use]
    pub fn runner(message: impl Into<String>) -> Self {
        Self::Runner {
            message: message.into(),
        }
    }

    /// Creates a new notification delivery error.
    #[must_use]
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    /// Returns true for the concurrent-build rejection.
    #[must_use]
    pub const fn is_concurrent_build(&self) -> bool {
        matches!(self, Self::ConcurrentBuild { .. })
    }
}
