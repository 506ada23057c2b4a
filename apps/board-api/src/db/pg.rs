//! PostgreSQL-backed [`DataStore`] on diesel-async.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel_async::pooled_connection::deadpool::{BuildError, Pool, PoolError};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection};
use scoped_futures::ScopedFutureExt;
use teamboard_common::model::{
    ChatMessage, Comment, Member, Notification, PresenceRecord, Project, ReadReceipt, Task,
    TaskStatus, UserSummary,
};

use crate::models::comment::CommentRow;
use crate::models::message::{MessageRow, NewMessageRow, ReadRow};
use crate::models::notification::NotificationRow;
use crate::models::presence::PresenceRow;
use crate::models::project::{MemberRow, ProjectRow};
use crate::models::task::{NewTaskRow, TaskChangeset, TaskRow};
use crate::models::user::UserRow;

use super::schema::{
    comments, message_reads, messages, notifications, presence, project_members, projects, tasks,
    users,
};
use super::store::{
    DataStore, NewComment, NewMessage, NewNotification, NewTask, ReorderPlan, StoreError,
    StoreResult, TaskUpdate,
};

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => StoreError::NotFound,
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => StoreError::Conflict(info.message().to_string()),
            other => {
                tracing::error!(err = ?other, "database error");
                StoreError::Unavailable(other.to_string())
            }
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        tracing::error!(?err, "pool error");
        StoreError::Unavailable(err.to_string())
    }
}

pub type DbPool = Pool<AsyncPgConnection>;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    /// Build a store over a fresh pool. Connections are opened lazily, so an
    /// unreachable database surfaces as `Unavailable` on first use.
    pub fn connect(database_url: &str, max_connections: usize) -> Result<Self, BuildError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager).max_size(max_connections).build()?;
        tracing::info!(max_connections, "database pool created");
        Ok(Self { pool })
    }
}

fn tasks_from_rows(rows: Vec<TaskRow>) -> StoreResult<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

#[async_trait]
impl DataStore for PgStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserSummary>> {
        let mut conn = self.pool.get().await?;
        let row: Option<UserRow> = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(UserRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(row.map(UserSummary::from))
    }

    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        let mut conn = self.pool.get().await?;
        let row: Option<ProjectRow> = diesel_async::RunQueryDsl::get_result(
            projects::table.find(project_id).select(ProjectRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(row.map(Project::from))
    }

    async fn get_membership(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Member>> {
        let mut conn = self.pool.get().await?;
        let row: Option<(MemberRow, String)> = diesel_async::RunQueryDsl::get_result(
            project_members::table
                .inner_join(users::table)
                .filter(project_members::project_id.eq(project_id))
                .filter(project_members::user_id.eq(user_id))
                .select((MemberRow::as_select(), users::name)),
            &mut conn,
        )
        .await
        .optional()?;
        row.map(|(member, name)| member.into_member(name))
            .transpose()
    }

    async fn list_members(&self, project_id: &str) -> StoreResult<Vec<Member>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<(MemberRow, String)> = diesel_async::RunQueryDsl::load(
            project_members::table
                .inner_join(users::table)
                .filter(project_members::project_id.eq(project_id))
                .order((project_members::joined_at.asc(), project_members::user_id.asc()))
                .select((MemberRow::as_select(), users::name)),
            &mut conn,
        )
        .await?;
        rows.into_iter()
            .map(|(member, name)| member.into_member(name))
            .collect()
    }

    async fn project_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = diesel_async::RunQueryDsl::load(
            project_members::table
                .filter(project_members::user_id.eq(user_id))
                .order(project_members::project_id.asc())
                .select(project_members::project_id),
            &mut conn,
        )
        .await?;
        Ok(ids)
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        let mut conn = self.pool.get().await?;
        let row: Option<TaskRow> = diesel_async::RunQueryDsl::get_result(
            tasks::table.find(task_id).select(TaskRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<TaskRow> = diesel_async::RunQueryDsl::load(
            tasks::table
                .filter(tasks::project_id.eq(project_id))
                .order((tasks::status.asc(), tasks::position.asc(), tasks::id.asc()))
                .select(TaskRow::as_select()),
            &mut conn,
        )
        .await?;
        let mut tasks = tasks_from_rows(rows)?;
        // Text ordering of status is alphabetical; re-sort into column order.
        tasks.sort_by_key(|t| (t.status, t.position));
        Ok(tasks)
    }

    async fn list_column(&self, project_id: &str, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<TaskRow> = diesel_async::RunQueryDsl::load(
            tasks::table
                .filter(tasks::project_id.eq(project_id))
                .filter(tasks::status.eq(status.as_str()))
                .order((tasks::position.asc(), tasks::id.asc()))
                .select(TaskRow::as_select()),
            &mut conn,
        )
        .await?;
        tasks_from_rows(rows)
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        let mut conn = self.pool.get().await?;
        let task = &task;

        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                let max_pos: Option<i32> = diesel_async::RunQueryDsl::get_result(
                    tasks::table
                        .filter(tasks::project_id.eq(&task.project_id))
                        .filter(tasks::status.eq(task.status.as_str()))
                        .select(diesel::dsl::max(tasks::position)),
                    conn,
                )
                .await?;

                let now = Utc::now();
                let row: TaskRow = diesel_async::RunQueryDsl::get_result(
                    diesel::insert_into(tasks::table)
                        .values(NewTaskRow {
                            id: &task.id,
                            project_id: &task.project_id,
                            title: &task.title,
                            description: task.description.as_deref(),
                            status: task.status.as_str(),
                            position: max_pos.map_or(0, |p| p + 1),
                            priority: task.priority.as_str(),
                            assignee_id: task.assignee_id.as_deref(),
                            created_by: &task.created_by,
                            created_at: now,
                            updated_at: now,
                        })
                        .returning(TaskRow::as_returning()),
                    conn,
                )
                .await?;

                Task::try_from(row)
            }
            .scope_boxed()
        })
        .await
    }

    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> StoreResult<Task> {
        let mut conn = self.pool.get().await?;
        let row: TaskRow = diesel_async::RunQueryDsl::get_result(
            diesel::update(tasks::table.find(task_id))
                .set(TaskChangeset {
                    title: update.title.as_deref(),
                    description: update.description.as_ref().map(|d| d.as_deref()),
                    priority: update.priority.map(|p| p.as_str()),
                    updated_at: Utc::now(),
                })
                .returning(TaskRow::as_returning()),
            &mut conn,
        )
        .await?;
        Task::try_from(row)
    }

    async fn delete_task(&self, task_id: &str) -> StoreResult<Task> {
        let mut conn = self.pool.get().await?;
        let row: TaskRow = diesel_async::RunQueryDsl::get_result(
            diesel::delete(tasks::table.find(task_id)).returning(TaskRow::as_returning()),
            &mut conn,
        )
        .await?;
        Task::try_from(row)
    }

    async fn assign_task(&self, task_id: &str, assignee_id: Option<&str>) -> StoreResult<Task> {
        let mut conn = self.pool.get().await?;
        let row: TaskRow = diesel_async::RunQueryDsl::get_result(
            diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::assignee_id.eq(assignee_id),
                    tasks::updated_at.eq(Utc::now()),
                ))
                .returning(TaskRow::as_returning()),
            &mut conn,
        )
        .await?;
        Task::try_from(row)
    }

    async fn commit_reorder(&self, plan: ReorderPlan) -> StoreResult<Task> {
        let mut conn = self.pool.get().await?;
        let plan = &plan;

        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                let now = Utc::now();
                for write in &plan.writes {
                    let updated = diesel_async::RunQueryDsl::execute(
                        diesel::update(
                            tasks::table
                                .filter(tasks::id.eq(&write.task_id))
                                .filter(tasks::project_id.eq(&plan.project_id)),
                        )
                        .set((
                            tasks::status.eq(write.status.as_str()),
                            tasks::position.eq(write.position),
                            tasks::updated_at.eq(now),
                        )),
                        conn,
                    )
                    .await?;

                    // A task deleted since the column was read aborts the
                    // whole plan.
                    if updated == 0 {
                        return Err(StoreError::NotFound);
                    }
                }

                let row: TaskRow = diesel_async::RunQueryDsl::get_result(
                    tasks::table.find(&plan.task_id).select(TaskRow::as_select()),
                    conn,
                )
                .await?;
                Task::try_from(row)
            }
            .scope_boxed()
        })
        .await
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<ChatMessage> {
        let mut conn = self.pool.get().await?;
        let row: MessageRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(NewMessageRow {
                    id: message.id,
                    project_id: &message.project_id,
                    author_id: &message.author_id,
                    content: &message.content,
                    type_: message.kind.as_str(),
                    file_url: message.file_url.as_deref(),
                    created_at: Utc::now(),
                })
                .returning(MessageRow::as_returning()),
            &mut conn,
        )
        .await?;
        ChatMessage::try_from(row)
    }

    async fn get_message(&self, message_id: i64) -> StoreResult<Option<ChatMessage>> {
        let mut conn = self.pool.get().await?;
        let row: Option<MessageRow> = diesel_async::RunQueryDsl::get_result(
            messages::table.find(message_id).select(MessageRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        row.map(ChatMessage::try_from).transpose()
    }

    async fn list_messages(
        &self,
        project_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        let mut conn = self.pool.get().await?;
        let mut query = messages::table
            .filter(messages::project_id.eq(project_id))
            .order(messages::id.desc())
            .limit(limit as i64)
            .select(MessageRow::as_select())
            .into_boxed();

        if let Some(before) = before {
            query = query.filter(messages::id.lt(before));
        }

        let rows: Vec<MessageRow> = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn upsert_read_receipt(
        &self,
        message_id: i64,
        user_id: &str,
    ) -> StoreResult<ReadReceipt> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let row: ReadRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(message_reads::table)
                .values(ReadRow {
                    message_id,
                    user_id: user_id.to_string(),
                    read_at: now,
                })
                .on_conflict((message_reads::message_id, message_reads::user_id))
                .do_update()
                .set(message_reads::read_at.eq(now))
                .returning(ReadRow::as_returning()),
            &mut conn,
        )
        .await
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::ForeignKeyViolation,
                _,
            ) => StoreError::NotFound,
            other => other.into(),
        })?;
        Ok(row.into())
    }

    async fn create_comment(&self, comment: NewComment) -> StoreResult<Comment> {
        let mut conn = self.pool.get().await?;
        let row: CommentRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(comments::table)
                .values(CommentRow {
                    id: comment.id,
                    task_id: comment.task_id,
                    author_id: comment.author_id,
                    content: comment.content,
                    created_at: Utc::now(),
                })
                .returning(CommentRow::as_returning()),
            &mut conn,
        )
        .await
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::ForeignKeyViolation,
                _,
            ) => StoreError::NotFound,
            other => other.into(),
        })?;
        Ok(row.into())
    }

    async fn list_comments(
        &self,
        task_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Comment>> {
        let mut conn = self.pool.get().await?;
        let mut query = comments::table
            .filter(comments::task_id.eq(task_id))
            .order(comments::id.desc())
            .limit(limit as i64)
            .select(CommentRow::as_select())
            .into_boxed();

        if let Some(before) = before {
            query = query.filter(comments::id.lt(before));
        }

        let rows: Vec<CommentRow> = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        let mut conn = self.pool.get().await?;
        let row: NotificationRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(notifications::table)
                .values(NotificationRow {
                    id: notification.id,
                    user_id: notification.user_id,
                    kind: notification.kind,
                    title: notification.title,
                    body: notification.body,
                    project_id: notification.project_id,
                    task_id: notification.task_id,
                    created_at: Utc::now(),
                })
                .returning(NotificationRow::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(row.into())
    }

    async fn set_presence(&self, user_id: &str, online: bool) -> StoreResult<PresenceRecord> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let row: PresenceRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(presence::table)
                .values(PresenceRow {
                    user_id: user_id.to_string(),
                    online,
                    last_active_at: now,
                })
                .on_conflict(presence::user_id)
                .do_update()
                .set((presence::online.eq(online), presence::last_active_at.eq(now)))
                .returning(PresenceRow::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(row.into())
    }

    async fn get_presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        let mut conn = self.pool.get().await?;
        let row: Option<PresenceRow> = diesel_async::RunQueryDsl::get_result(
            presence::table.find(user_id).select(PresenceRow::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(row.map(PresenceRecord::from))
    }
}
