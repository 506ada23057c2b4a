//! The data-access handle injected into the gateway, the order service and
//! the REST routes. Everything durable goes through [`DataStore`].

use async_trait::async_trait;
use teamboard_common::model::{
    ChatMessage, Comment, Member, MessageType, Notification, PresenceRecord, Project, ReadReceipt,
    Task, TaskPriority, TaskStatus, UserSummary,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("data store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<String>,
    pub created_by: String,
}

/// Partial task edit. `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: i64,
    pub project_id: String,
    pub author_id: String,
    pub content: String,
    pub kind: MessageType,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub id: i64,
    pub task_id: String,
    pub author_id: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

/// One durable position assignment produced by the order service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionWrite {
    pub task_id: String,
    pub status: TaskStatus,
    pub position: i32,
}

/// Every position write for the columns touched by one move. Applied
/// all-or-nothing.
#[derive(Debug, Clone)]
pub struct ReorderPlan {
    pub project_id: String,
    pub task_id: String,
    pub writes: Vec<PositionWrite>,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserSummary>>;

    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>>;
    async fn get_membership(&self, project_id: &str, user_id: &str)
        -> StoreResult<Option<Member>>;
    async fn list_members(&self, project_id: &str) -> StoreResult<Vec<Member>>;
    async fn project_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>>;

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>>;
    /// All tasks of a project ordered by (status, position).
    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>>;
    /// One column ordered by position.
    async fn list_column(&self, project_id: &str, status: TaskStatus) -> StoreResult<Vec<Task>>;
    /// Insert a task at the end of its column.
    async fn create_task(&self, task: NewTask) -> StoreResult<Task>;
    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> StoreResult<Task>;
    async fn delete_task(&self, task_id: &str) -> StoreResult<Task>;
    async fn assign_task(&self, task_id: &str, assignee_id: Option<&str>) -> StoreResult<Task>;
    /// Apply a reorder atomically and return the moved task.
    async fn commit_reorder(&self, plan: ReorderPlan) -> StoreResult<Task>;

    async fn create_message(&self, message: NewMessage) -> StoreResult<ChatMessage>;
    async fn get_message(&self, message_id: i64) -> StoreResult<Option<ChatMessage>>;
    /// Newest first, strictly older than `before` when given.
    async fn list_messages(
        &self,
        project_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>>;
    async fn upsert_read_receipt(&self, message_id: i64, user_id: &str)
        -> StoreResult<ReadReceipt>;

    async fn create_comment(&self, comment: NewComment) -> StoreResult<Comment>;
    async fn list_comments(
        &self,
        task_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Comment>>;

    async fn create_notification(&self, notification: NewNotification)
        -> StoreResult<Notification>;

    async fn set_presence(&self, user_id: &str, online: bool) -> StoreResult<PresenceRecord>;
    async fn get_presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>>;
}
