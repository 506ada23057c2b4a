use chrono::{DateTime, Utc};
use diesel::prelude::*;
use teamboard_common::model::{Member, Project};

use crate::db::schema::{project_members, projects};
use crate::db::store::StoreError;

use super::parse_column;

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = projects)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = project_members)]
pub struct MemberRow {
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl MemberRow {
    /// Combine with the joined user name.
    pub fn into_member(self, user_name: String) -> Result<Member, StoreError> {
        Ok(Member {
            role: parse_column("project_members.role", &self.role)?,
            project_id: self.project_id,
            user_id: self.user_id,
            user_name,
            joined_at: self.joined_at,
        })
    }
}
