//! Build engine data models.

pub mod build;
pub mod changed_object;
pub mod site;
pub mod user;

pub use build::{Build, BuildData, BuildStatus, BuildType, NewBuild};
pub use changed_object::{ChangeType, ChangedObject};
pub use site::{Site, SiteSettings, SiteStatus, SiteType};
pub use user::User;
