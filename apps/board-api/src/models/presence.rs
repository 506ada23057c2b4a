use chrono::{DateTime, Utc};
use diesel::prelude::*;
use teamboard_common::model::PresenceRecord;

use crate::db::schema::presence;

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = presence)]
pub struct PresenceRow {
    pub user_id: String,
    pub online: bool,
    pub last_active_at: DateTime<Utc>,
}

impl From<PresenceRow> for PresenceRecord {
    fn from(row: PresenceRow) -> Self {
        Self {
            user_id: row.user_id,
            online: row.online,
            last_active_at: row.last_active_at,
        }
    }
}
