//! Site lookup and per-site bookkeeping consumed by the build engine.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Site, SiteSettings};

/// The site collaborator.
#[async_trait]
pub trait SiteService: Send + Sync {
    /// Fails with [`Error::SiteNotFound`] if no site has this key.
    async fn get_site_by_key(&self, site_key: &str) -> Result<Site>;

    async fn get_site(&self, site_id: i64) -> Result<Site>;

    /// Atomically increments the site's build counter and returns the new
    /// value. Concurrent callers never observe the same number.
    async fn increment_last_build_number(&self, site_id: i64) -> Result<i64>;

    /// Records a successful preview build.
    async fn record_preview_build(&self, site_id: i64, site_build_number: i64) -> Result<()>;

    /// Records a successful publish build. `published_version` is the
    /// snapshot it created, if any.
    async fn record_publish_build(
        &self,
        site_id: i64,
        site_build_number: i64,
        published_version: Option<u32>,
    ) -> Result<()>;

    /// Replaces the site's settings.
    async fn update_site_settings(&self, site_id: i64, settings: SiteSettings) -> Result<()>;
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("site registry lock poisoned")
}

fn unknown(site_id: i64) -> Error {
    Error::SiteNotFound {
        site_key: format!("#{site_id}"),
    }
}

/// In-memory site registry for tests and development.
#[derive(Debug, Default)]
pub struct InMemorySiteService {
    sites: RwLock<BTreeMap<i64, Site>>,
}

impl InMemorySiteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a site.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, site: Site) -> Result<()> {
        self.sites.write().map_err(poison_err)?.insert(site.id, site);
        Ok(())
    }

    fn update(&self, site_id: i64, f: impl FnOnce(&mut Site)) -> Result<Site> {
        let mut sites = self.sites.write().map_err(poison_err)?;
        let site = sites.get_mut(&site_id).ok_or_else(|| unknown(site_id))?;
        f(site);
        Ok(site.clone())
    }
}

#[async_trait]
impl SiteService for InMemorySiteService {
    async fn get_site_by_key(&self, site_key: &str) -> Result<Site> {
        let sites = self.sites.read().map_err(poison_err)?;
        sites
            .values()
            .find(|s| s.site_key == site_key)
            .cloned()
            .ok_or_else(|| Error::SiteNotFound {
                site_key: site_key.to_string(),
            })
    }

    async fn get_site(&self, site_id: i64) -> Result<Site> {
        let sites = self.sites.read().map_err(poison_err)?;
        sites.get(&site_id).cloned().ok_or_else(|| unknown(site_id))
    }

    async fn increment_last_build_number(&self, site_id: i64) -> Result<i64> {
        let site = self.update(site_id, |s| s.last_build_number += 1)?;
        Ok(site.last_build_number)
    }

    async fn record_preview_build(&self, site_id: i64, site_build_number: i64) -> Result<()> {
        self.update(site_id, |s| s.last_preview_build = Some(site_build_number))?;
        Ok(())
    }

    async fn record_publish_build(
        &self,
        site_id: i64,
        site_build_number: i64,
        published_version: Option<u32>,
    ) -> Result<()> {
        self.update(site_id, |s| {
            s.last_publish_build = Some(site_build_number);
            if let Some(version) = published_version {
                s.published_version = version;
            }
        })?;
        Ok(())
    }

    async fn update_site_settings(&self, site_id: i64, settings: SiteSettings) -> Result<()> {
        self.update(site_id, |s| s.settings = settings)?;
        Ok(())
    }
}
