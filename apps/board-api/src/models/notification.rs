use chrono::{DateTime, Utc};
use diesel::prelude::*;
use teamboard_common::model::Notification;

use crate::db::schema::notifications;

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = notifications)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            title: row.title,
            body: row.body,
            project_id: row.project_id,
            task_id: row.task_id,
            created_at: row.created_at,
        }
    }
}
