//! site_builds: one row per build attempt.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use statichost_builds::model::{Build, BuildData, NewBuild};
use statichost_builds::Result;

use super::decode_err;
use crate::schema::site_builds;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = site_builds)]
pub struct BuildRow {
    pub id: i64,
    pub account_id: i64,
    pub site_id: i64,
    pub site_build_number: i64,
    pub initiating_user_id: Option<i64>,
    pub build_type: String,
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub create_date: DateTime<Utc>,
    pub queued_date: Option<DateTime<Utc>>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
}

impl BuildRow {
    pub fn into_build(self) -> Result<Build> {
        let data = self
            .data
            .map(serde_json::from_value::<BuildData>)
            .transpose()
            .map_err(|e| decode_err("data", e))?;
        Ok(Build {
            id: self.id,
            account_id: self.account_id,
            site_id: self.site_id,
            site_build_number: self.site_build_number,
            initiating_user_id: self.initiating_user_id,
            build_type: self.build_type.parse()?,
            status: self.status.parse()?,
            data,
            created_date: self.create_date,
            queued_date: self.queued_date,
            started_date: self.started_date,
            completed_date: self.completed_date,
            failure_message: self.failure_message,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = site_builds)]
pub struct NewBuildRow {
    pub account_id: i64,
    pub site_id: i64,
    pub site_build_number: i64,
    pub initiating_user_id: Option<i64>,
    pub build_type: String,
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub create_date: DateTime<Utc>,
}

impl NewBuildRow {
    pub fn from_new_build(build: &NewBuild) -> Result<Self> {
        Ok(Self {
            account_id: build.account_id,
            site_id: build.site_id,
            site_build_number: build.site_build_number,
            initiating_user_id: build.initiating_user_id,
            build_type: build.build_type.as_str().to_string(),
            status: build.status.as_str().to_string(),
            data: build.data.as_ref().map(serde_json::to_value).transpose()?,
            create_date: build.created_date,
        })
    }
}

/// Every column a status change may touch. `None` clears the column.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = site_builds, treat_none_as_null = true)]
pub struct BuildChanges {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub queued_date: Option<DateTime<Utc>>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
}

impl BuildChanges {
    pub fn from_build(build: &Build) -> Result<Self> {
        Ok(Self {
            status: build.status.as_str().to_string(),
            data: build.data.as_ref().map(serde_json::to_value).transpose()?,
            queued_date: build.queued_date,
            started_date: build.started_date,
            completed_date: build.completed_date,
            failure_message: build.failure_message.clone(),
        })
    }
}
