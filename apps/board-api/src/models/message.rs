use chrono::{DateTime, Utc};
use diesel::prelude::*;
use teamboard_common::model::{ChatMessage, ReadReceipt};

use crate::db::schema::{message_reads, messages};
use crate::db::store::StoreError;

use super::parse_column;

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: i64,
    pub project_id: String,
    pub author_id: String,
    pub content: String,
    pub type_: String,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: parse_column("messages.type", &row.type_)?,
            id: row.id,
            project_id: row.project_id,
            author_id: row.author_id,
            content: row.content,
            file_url: row.file_url,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub id: i64,
    pub project_id: &'a str,
    pub author_id: &'a str,
    pub content: &'a str,
    pub type_: &'a str,
    pub file_url: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = message_reads)]
pub struct ReadRow {
    pub message_id: i64,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

impl From<ReadRow> for ReadReceipt {
    fn from(row: ReadRow) -> Self {
        Self {
            message_id: row.message_id,
            user_id: row.user_id,
            read_at: row.read_at,
        }
    }
}
