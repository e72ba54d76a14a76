//! Postgres connection pool and schema migration.

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// Shared async connection pool.
pub type DbPool = Pool<AsyncPgConnection>;

/// SQL migration for the build engine tables.
///
/// The partial unique index on `site_builds (site_id) WHERE status = 'RUNNING'`
/// is what makes a RUNNING claim atomic across workers.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sites (
    id                  BIGSERIAL PRIMARY KEY,
    account_id          BIGINT NOT NULL,
    site_key            VARCHAR(255) NOT NULL UNIQUE,
    site_type           VARCHAR(32) NOT NULL DEFAULT 'PLAIN',
    status              VARCHAR(32) NOT NULL DEFAULT 'ACTIVE',
    last_build_number   BIGINT NOT NULL DEFAULT 0,
    published_version   INTEGER NOT NULL DEFAULT 0,
    maintenance_mode    BOOLEAN NOT NULL DEFAULT FALSE,
    last_preview_build  BIGINT,
    last_publish_build  BIGINT,
    settings            JSONB NOT NULL DEFAULT '{}',
    create_date         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    write_date          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_sites_account ON sites (account_id);

CREATE TABLE IF NOT EXISTS site_builds (
    id                  BIGSERIAL PRIMARY KEY,
    account_id          BIGINT NOT NULL,
    site_id             BIGINT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    site_build_number   BIGINT NOT NULL,
    initiating_user_id  BIGINT,
    build_type          VARCHAR(32) NOT NULL,
    status              VARCHAR(32) NOT NULL DEFAULT 'PENDING',
    data                JSONB,
    create_date         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    queued_date         TIMESTAMPTZ,
    started_date        TIMESTAMPTZ,
    completed_date      TIMESTAMPTZ,
    failure_message     TEXT,
    UNIQUE (site_id, site_build_number)
);

CREATE INDEX IF NOT EXISTS idx_site_builds_site_created ON site_builds (site_id, create_date DESC);
CREATE INDEX IF NOT EXISTS idx_site_builds_site_status ON site_builds (site_id, status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_site_builds_one_running
    ON site_builds (site_id) WHERE status = 'RUNNING';
"#;

/// Build a connection pool for `database_url`.
pub fn connect(database_url: &str, max_size: usize) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager).max_size(max_size).build()?;
    Ok(pool)
}

/// Run the migration SQL.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL).await?;
    tracing::info!("Build engine migration applied");
    Ok(())
}
