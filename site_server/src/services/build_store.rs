//! Postgres-backed build store.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::RunQueryDsl;

use statichost_builds::model::{Build, BuildStatus, NewBuild};
use statichost_builds::store::{BuildStore, ClaimResult};
use statichost_builds::{Error, Result};

use super::{db_err, pool_err, sql_count};
use crate::db::DbPool;
use crate::models::build::{BuildChanges, BuildRow, NewBuildRow};
use crate::schema::site_builds;

/// Statuses a RUNNING claim may start from.
const CLAIMABLE: [&str; 2] = ["PENDING", "QUEUED"];

/// [`BuildStore`] over the `site_builds` table.
///
/// `claim_running` only updates a row that is still PENDING or QUEUED, and
/// relies on the partial unique index `idx_site_builds_one_running`: the
/// second concurrent claim for a site fails with a unique violation instead
/// of producing two RUNNING rows.
#[derive(Clone)]
pub struct PgBuildStore {
    pool: DbPool,
}

impl PgBuildStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn insert(&self, build: NewBuild) -> Result<Build> {
        let row = NewBuildRow::from_new_build(&build)?;
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        diesel::insert_into(site_builds::table)
            .values(&row)
            .returning(BuildRow::as_returning())
            .get_result::<BuildRow>(&mut conn)
            .await
            .map_err(db_err)?
            .into_build()
    }

    async fn save(&self, build: &Build) -> Result<()> {
        let changes = BuildChanges::from_build(build)?;
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let updated = diesel::update(site_builds::table.find(build.id))
            .set(&changes)
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::BuildNotFound { build_id: build.id });
        }
        Ok(())
    }

    async fn fetch(&self, build_id: i64) -> Result<Option<Build>> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        site_builds::table
            .find(build_id)
            .select(BuildRow::as_select())
            .first::<BuildRow>(&mut conn)
            .await
            .optional()
            .map_err(db_err)?
            .map(BuildRow::into_build)
            .transpose()
    }

    async fn count_running_for_site(&self, site_id: i64, excluding_build_id: i64) -> Result<u64> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let count: i64 = site_builds::table
            .filter(site_builds::site_id.eq(site_id))
            .filter(site_builds::status.eq(BuildStatus::Running.as_str()))
            .filter(site_builds::id.ne(excluding_build_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn claim_running(&self, build: &Build) -> Result<ClaimResult> {
        let changes = BuildChanges::from_build(build)?;
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let result = diesel::update(
            site_builds::table
                .find(build.id)
                .filter(site_builds::status.eq_any(CLAIMABLE)),
        )
        .set(&changes)
        .execute(&mut conn)
        .await;

        match result {
            Ok(0) => {
                let status = site_builds::table
                    .find(build.id)
                    .select(site_builds::status)
                    .first::<String>(&mut conn)
                    .await
                    .optional()
                    .map_err(db_err)?;
                match status {
                    None => Ok(ClaimResult::NotFound),
                    Some(status) => {
                        let status: BuildStatus = status.parse()?;
                        tracing::debug!(
                            build_id = build.id,
                            %status,
                            "RUNNING claim on a build already claimed"
                        );
                        Ok(ClaimResult::AlreadyClaimed { status })
                    }
                }
            }
            Ok(_) => Ok(ClaimResult::Claimed),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                let running_build_id = site_builds::table
                    .filter(site_builds::site_id.eq(build.site_id))
                    .filter(site_builds::status.eq(BuildStatus::Running.as_str()))
                    .select(site_builds::id)
                    .first::<i64>(&mut conn)
                    .await
                    .optional()
                    .map_err(db_err)?;
                tracing::debug!(
                    build_id = build.id,
                    ?running_build_id,
                    "RUNNING claim lost to another build"
                );
                Ok(ClaimResult::AlreadyRunning {
                    running_build_id: running_build_id.unwrap_or_default(),
                })
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn list_with_status(&self, status: BuildStatus) -> Result<Vec<Build>> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        site_builds::table
            .filter(site_builds::status.eq(status.as_str()))
            .order(site_builds::id.asc())
            .select(BuildRow::as_select())
            .load::<BuildRow>(&mut conn)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(BuildRow::into_build)
            .collect()
    }

    async fn list_for_site(
        &self,
        site_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Build>> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        site_builds::table
            .filter(site_builds::site_id.eq(site_id))
            .order((site_builds::create_date.desc(), site_builds::id.desc()))
            .limit(sql_count(limit))
            .offset(sql_count(offset))
            .select(BuildRow::as_select())
            .load::<BuildRow>(&mut conn)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(BuildRow::into_build)
            .collect()
    }
}
