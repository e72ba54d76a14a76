//! Row types for the build engine tables, and their conversion to and from
//! the engine's models.

pub mod build;
pub mod site;

use statichost_builds::Error;

/// Wraps a column that failed to decode into a storage error.
pub(crate) fn decode_err(column: &str, e: impl std::fmt::Display) -> Error {
    Error::storage(format!("invalid {column} column: {e}"))
}
