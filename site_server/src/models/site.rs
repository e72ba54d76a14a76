//! sites: the hosted sites builds belong to.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use statichost_builds::model::{Site, SiteSettings};
use statichost_builds::Result;

use super::decode_err;
use crate::schema::sites;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sites)]
pub struct SiteRow {
    pub id: i64,
    pub account_id: i64,
    pub site_key: String,
    pub site_type: String,
    pub status: String,
    pub last_build_number: i64,
    pub published_version: i32,
    pub maintenance_mode: bool,
    pub last_preview_build: Option<i64>,
    pub last_publish_build: Option<i64>,
    pub settings: serde_json::Value,
    pub create_date: DateTime<Utc>,
    pub write_date: DateTime<Utc>,
}

impl SiteRow {
    pub fn into_site(self) -> Result<Site> {
        let settings: SiteSettings =
            serde_json::from_value(self.settings).map_err(|e| decode_err("settings", e))?;
        Ok(Site {
            id: self.id,
            account_id: self.account_id,
            site_key: self.site_key,
            site_type: self.site_type.parse()?,
            status: self.status.parse()?,
            last_build_number: self.last_build_number,
            published_version: u32::try_from(self.published_version)
                .map_err(|e| decode_err("published_version", e))?,
            maintenance_mode: self.maintenance_mode,
            last_preview_build: self.last_preview_build,
            last_publish_build: self.last_publish_build,
            settings,
        })
    }
}
