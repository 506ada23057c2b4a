pub mod comments;
pub mod health;
pub mod messages;
pub mod projects;
pub mod tasks;

use axum::Router;
use teamboard_common::model::Task;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::ApiError;
use crate::gateway::{Grant, RoomKey};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            projects::router()
                .merge(tasks::router())
                .merge(messages::router())
                .merge(comments::router()),
        )
}

/// Membership check for REST callers. Non-members get 404, never 403.
pub(crate) async fn project_access(
    state: &AppState,
    user_id: &str,
    project_id: &str,
) -> Result<Grant, ApiError> {
    state
        .oracle
        .authorize(user_id, &RoomKey::Project(project_id.to_string()), None)
        .await
        .map_err(|e| match ApiError::from(e) {
            err if err.code == "NOT_FOUND" => ApiError::not_found("Project not found"),
            err => err,
        })
}

/// Load a task the caller may see, plus their grant on its project.
pub(crate) async fn task_access(
    state: &AppState,
    user_id: &str,
    task_id: &str,
) -> Result<(Task, Grant), ApiError> {
    let task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;

    let grant = project_access(state, user_id, &task.project_id)
        .await
        .map_err(|e| match e.code {
            "NOT_FOUND" => ApiError::not_found("Task not found"),
            _ => e,
        })?;
    Ok((task, grant))
}

pub(crate) fn require_write(grant: &Grant) -> Result<(), ApiError> {
    if grant.role.can_write() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Write access required"))
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        projects::get_project,
        projects::list_tasks,
        projects::create_task,
        tasks::update_task,
        tasks::delete_task,
        tasks::assign_task,
        tasks::move_task,
        messages::list_messages,
        comments::list_comments,
        comments::add_comment,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            teamboard_common::model::Project,
            teamboard_common::model::Member,
            teamboard_common::model::ProjectRole,
            teamboard_common::model::Task,
            teamboard_common::model::TaskStatus,
            teamboard_common::model::TaskPriority,
            teamboard_common::model::TaskPosition,
            teamboard_common::model::ChatMessage,
            teamboard_common::model::MessageType,
            teamboard_common::model::Comment,
            health::HealthResponse,
            projects::ProjectSnapshot,
            projects::CreateTaskRequest,
            tasks::UpdateTaskRequest,
            tasks::AssignTaskRequest,
            tasks::MoveTaskRequest,
            tasks::MoveTaskResponse,
            comments::AddCommentRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Projects", description = "Project snapshots and task creation"),
        (name = "Tasks", description = "Task edits, assignment and ordering"),
        (name = "Messages", description = "Chat history"),
        (name = "Comments", description = "Task comments"),
    )
)]
pub struct ApiDoc;

/// `?cursor=<id>&limit=<n>` for newest-first history endpoints.
#[derive(Debug, serde::Deserialize)]
pub struct CursorParams {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

impl CursorParams {
    /// Parsed cursor and clamped limit (1-100, default 50).
    pub fn resolve(&self) -> Result<(Option<i64>, usize), ApiError> {
        let cursor = match self.cursor.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| ApiError::bad_request("cursor must be a message or comment id"))?,
            ),
        };
        let limit = self.limit.unwrap_or(50).clamp(1, 100) as usize;
        Ok((cursor, limit))
    }
}
