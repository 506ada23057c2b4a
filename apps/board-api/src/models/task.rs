use chrono::{DateTime, Utc};
use diesel::prelude::*;
use teamboard_common::model::Task;

use crate::db::schema::tasks;
use crate::db::store::StoreError;

use super::parse_column;

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = tasks)]
pub struct TaskRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub position: i32,
    pub priority: String,
    pub assignee_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: parse_column("tasks.status", &row.status)?,
            priority: parse_column("tasks.priority", &row.priority)?,
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            description: row.description,
            position: row.position,
            assignee_id: row.assignee_id,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow<'a> {
    pub id: &'a str,
    pub project_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: &'a str,
    pub position: i32,
    pub priority: &'a str,
    pub assignee_id: Option<&'a str>,
    pub created_by: &'a str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct TaskChangeset<'a> {
    pub title: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub priority: Option<&'a str>,
    pub updated_at: DateTime<Utc>,
}
