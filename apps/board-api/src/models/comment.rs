use chrono::{DateTime, Utc};
use diesel::prelude::*;
use teamboard_common::model::Comment;

use crate::db::schema::comments;

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = comments)]
pub struct CommentRow {
    pub id: i64,
    pub task_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            task_id: row.task_id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}
