//! Diesel row types for [`crate::db::pg::PgStore`] and their conversion into
//! the shared domain records.

pub mod comment;
pub mod message;
pub mod notification;
pub mod presence;
pub mod project;
pub mod task;
pub mod user;

use std::str::FromStr;

use crate::db::store::StoreError;

/// Parse a text column into an enum, treating bad values as corruption.
pub(crate) fn parse_column<T: FromStr>(column: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|_| {
        tracing::error!(column, value = raw, "unparseable column value");
        StoreError::Unavailable(format!("corrupt {column} value"))
    })
}
