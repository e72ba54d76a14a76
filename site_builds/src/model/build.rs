//! site.build: one attempt to materialise a deployable state for a site.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::changed_object::ChangedObject;

/// The kind of work a build performs. Each type maps to one runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildType {
    SourceUpload,
    VersionRevert,
    Current,
    Preview,
    Publish,
}

impl BuildType {
    pub const ALL: [Self; 5] = [
        Self::SourceUpload,
        Self::VersionRevert,
        Self::Current,
        Self::Preview,
        Self::Publish,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SourceUpload => "SOURCE_UPLOAD",
            Self::VersionRevert => "VERSION_REVERT",
            Self::Current => "CURRENT",
            Self::Preview => "PREVIEW",
            Self::Publish => "PUBLISH",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::storage(format!("unknown build type: {s}")))
    }
}

/// Build lifecycle state.
///
/// `PENDING -> QUEUED -> RUNNING -> {SUCCEEDED | FAILED}`; PENDING may skip
/// straight to RUNNING for synchronous runs, and a build that never started
/// may still be marked FAILED. Terminal states accept no further changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Pending,
    Queued,
    Running,
    Failed,
    Succeeded,
}

impl BuildStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Failed,
        Self::Succeeded,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Failed => "FAILED",
            Self::Succeeded => "SUCCEEDED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Succeeded)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued | Self::Running | Self::Failed)
                | (Self::Queued, Self::Running | Self::Failed)
                | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::storage(format!("unknown build status: {s}")))
    }
}

/// Typed payload attached to a build at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BuildData {
    /// Files uploaded by the site owner, applied by the source-upload runner.
    #[serde(rename_all = "camelCase")]
    SourceUpload { changed_objects: Vec<ChangedObject> },
    /// Content version the version-revert runner restores.
    #[serde(rename_all = "camelCase")]
    VersionRevert { target_version: u32 },
}

impl BuildData {
    pub fn changed_objects(&self) -> Option<&[ChangedObject]> {
        match self {
            Self::SourceUpload { changed_objects } => Some(changed_objects),
            Self::VersionRevert { .. } => None,
        }
    }

    pub fn target_version(&self) -> Option<u32> {
        match self {
            Self::VersionRevert { target_version } => Some(*target_version),
            Self::SourceUpload { .. } => None,
        }
    }
}

/// A persisted build attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: i64,
    pub account_id: i64,
    pub site_id: i64,
    pub site_build_number: i64,
    pub initiating_user_id: Option<i64>,
    pub build_type: BuildType,
    pub status: BuildStatus,
    pub data: Option<BuildData>,
    pub created_date: DateTime<Utc>,
    pub queued_date: Option<DateTime<Utc>>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
}

impl Build {
    /// Applies a status change and stamps the matching timestamp.
    ///
    /// Only mutates fields; persisting the change is the caller's job (see
    /// [`crate::service::BuildService::register_status_change`]).
    pub fn register_status_change(
        &mut self,
        status: BuildStatus,
        message: Option<&str>,
    ) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition {
                from: self.status,
                to: status,
            });
        }

        let now = Utc::now();
        self.status = status;
        match status {
            BuildStatus::Queued => self.queued_date = Some(now),
            BuildStatus::Running => self.started_date = Some(now),
            BuildStatus::Failed => {
                self.completed_date = Some(now);
                self.failure_message = message.map(str::to_string);
            }
            BuildStatus::Succeeded => self.completed_date = Some(now),
            BuildStatus::Pending => {}
        }
        Ok(())
    }

    /// Wall-clock time between start and completion, once both are known.
    pub fn duration(&self) -> Option<Duration> {
        Some(self.completed_date? - self.started_date?)
    }
}

/// A build that has not been stored yet. The store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBuild {
    pub account_id: i64,
    pub site_id: i64,
    pub site_build_number: i64,
    pub initiating_user_id: Option<i64>,
    pub build_type: BuildType,
    pub status: BuildStatus,
    pub data: Option<BuildData>,
    pub created_date: DateTime<Utc>,
}

impl NewBuild {
    /// Attaches the store-assigned id.
    pub fn into_build(self, id: i64) -> Build {
        Build {
            id,
            account_id: self.account_id,
            site_id: self.site_id,
            site_build_number: self.site_build_number,
            initiating_user_id: self.initiating_user_id,
            build_type: self.build_type,
            status: self.status,
            data: self.data,
            created_date: self.created_date,
            queued_date: None,
            started_date: None,
            completed_date: None,
            failure_message: None,
        }
    }
}
