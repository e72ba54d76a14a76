//! site: the hosted website a build belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Plain sites serve uploaded files as-is; dynamic sites also carry entity
/// definitions and content, and keep numbered publish snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteType {
    Plain,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Active,
    Suspended,
}

macro_rules! string_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(Error::storage(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(SiteType { Plain => "PLAIN", Dynamic => "DYNAMIC" });
string_enum!(SiteStatus { Active => "ACTIVE", Suspended => "SUSPENDED" });

/// Owner-editable site configuration, sourced from `site.json` in the
/// uploaded content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_found_page: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: i64,
    pub account_id: i64,
    pub site_key: String,
    pub site_type: SiteType,
    pub status: SiteStatus,
    /// Number handed to the most recently created build.
    pub last_build_number: i64,
    /// Latest publish snapshot; 0 until the first dynamic publish.
    pub published_version: u32,
    pub maintenance_mode: bool,
    pub last_preview_build: Option<i64>,
    pub last_publish_build: Option<i64>,
    pub settings: SiteSettings,
}

impl Site {
    /// A fresh, active site with no builds.
    pub fn new(id: i64, account_id: i64, site_key: impl Into<String>, site_type: SiteType) -> Self {
        Self {
            id,
            account_id,
            site_key: site_key.into(),
            site_type,
            status: SiteStatus::Active,
            last_build_number: 0,
            published_version: 0,
            maintenance_mode: false,
            last_preview_build: None,
            last_publish_build: None,
            settings: SiteSettings::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SiteStatus::Active
    }

    pub fn is_plain(&self) -> bool {
        self.site_type == SiteType::Plain
    }
}
