//! Postgres-backed site lookup and bookkeeping.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use statichost_builds::model::{Site, SiteSettings};
use statichost_builds::sites::SiteService;
use statichost_builds::{Error, Result};

use super::{db_err, pool_err};
use crate::db::DbPool;
use crate::models::site::SiteRow;
use crate::schema::sites;

fn unknown(site_id: i64) -> Error {
    Error::SiteNotFound {
        site_key: format!("#{site_id}"),
    }
}

/// [`SiteService`] over the `sites` table.
#[derive(Clone)]
pub struct PgSiteService {
    pool: DbPool,
}

impl PgSiteService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Fails with `SiteNotFound` when no row was touched.
    fn expect_row(updated: usize, site_id: i64) -> Result<()> {
        if updated == 0 {
            return Err(unknown(site_id));
        }
        Ok(())
    }
}

#[async_trait]
impl SiteService for PgSiteService {
    async fn get_site_by_key(&self, site_key: &str) -> Result<Site> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        sites::table
            .filter(sites::site_key.eq(site_key))
            .select(SiteRow::as_select())
            .first::<SiteRow>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::SiteNotFound {
                site_key: site_key.to_string(),
            })?
            .into_site()
    }

    async fn get_site(&self, site_id: i64) -> Result<Site> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        sites::table
            .find(site_id)
            .select(SiteRow::as_select())
            .first::<SiteRow>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| unknown(site_id))?
            .into_site()
    }

    async fn increment_last_build_number(&self, site_id: i64) -> Result<i64> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        diesel::update(sites::table.find(site_id))
            .set((
                sites::last_build_number.eq(sites::last_build_number + 1),
                sites::write_date.eq(chrono::Utc::now()),
            ))
            .returning(sites::last_build_number)
            .get_result::<i64>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| unknown(site_id))
    }

    async fn record_preview_build(&self, site_id: i64, site_build_number: i64) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let updated = diesel::update(sites::table.find(site_id))
            .set((
                sites::last_preview_build.eq(Some(site_build_number)),
                sites::write_date.eq(chrono::Utc::now()),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Self::expect_row(updated, site_id)
    }

    async fn record_publish_build(
        &self,
        site_id: i64,
        site_build_number: i64,
        published_version: Option<u32>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let target = diesel::update(sites::table.find(site_id));
        let now = chrono::Utc::now();
        let updated = match published_version {
            Some(version) => {
                let version = i32::try_from(version)
                    .map_err(|e| Error::storage(format!("published version out of range: {e}")))?;
                target
                    .set((
                        sites::last_publish_build.eq(Some(site_build_number)),
                        sites::published_version.eq(version),
                        sites::write_date.eq(now),
                    ))
                    .execute(&mut conn)
                    .await
            }
            None => {
                target
                    .set((
                        sites::last_publish_build.eq(Some(site_build_number)),
                        sites::write_date.eq(now),
                    ))
                    .execute(&mut conn)
                    .await
            }
        }
        .map_err(db_err)?;
        Self::expect_row(updated, site_id)
    }

    async fn update_site_settings(&self, site_id: i64, settings: SiteSettings) -> Result<()> {
        let settings = serde_json::to_value(settings)?;
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let updated = diesel::update(sites::table.find(site_id))
            .set((
                sites::settings.eq(settings),
                sites::write_date.eq(chrono::Utc::now()),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Self::expect_row(updated, site_id)
    }
}
