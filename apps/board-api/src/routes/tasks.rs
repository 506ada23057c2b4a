//! Task edits, deletion, assignment and moves. Each successful mutation is
//! announced to the project room.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, put};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer, Serialize};
use teamboard_common::model::{Task, TaskPriority, TaskStatus};
use teamboard_common::protocol::{event, TaskAssigned, TaskDeleted, TaskMoved};
use utoipa::ToSchema;

use crate::auth::middleware::{AuthUser, OriginConnection};
use crate::db::store::TaskUpdate;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::AppState;

use super::projects::{notify_assignee, MAX_TITLE_CHARS};
use super::{require_write, task_access};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks/{task_id}", patch(update_task).delete(delete_task))
        .route("/tasks/{task_id}/assignee", put(assign_task))
        .route("/tasks/{task_id}/move", put(move_task))
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

// ---------------------------------------------------------------------------
// PATCH /api/v1/tasks/{task_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    /// `null` clears the description.
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub priority: Option<TaskPriority>,
}

#[utoipa::path(
    patch,
    path = "/api/v1/tasks/{task_id}",
    tag = "Tasks",
    security(("bearer" = [])),
    params(("task_id" = String, Path, description = "Task ID")),
    request_body = UpdateTaskRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Read-only member", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn update_task(
    AuthUser { user_id, .. }: AuthUser,
    OriginConnection(origin): OriginConnection,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let (task, grant) = task_access(&state, &user_id, &task_id).await?;
    require_write(&grant)?;

    let title = body.title.map(|t| t.trim().to_string());
    match title.as_deref() {
        Some("") => {
            return Err(ApiError::validation(vec![FieldError::new(
                "title",
                "Title cannot be empty",
            )]))
        }
        Some(t) if t.chars().count() > MAX_TITLE_CHARS => {
            return Err(ApiError::validation(vec![FieldError::new(
                "title",
                format!("Title must be {MAX_TITLE_CHARS} characters or fewer"),
            )]))
        }
        _ => {}
    }

    let updated = state
        .store
        .update_task(
            &task_id,
            TaskUpdate {
                title,
                description: body
                    .description
                    .map(|d| d.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())),
                priority: body.priority,
            },
        )
        .await?;

    state
        .fanout
        .to_project(&task.project_id, event::TASK_UPDATED, &updated, origin.as_deref());
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/tasks/{task_id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{task_id}",
    tag = "Tasks",
    security(("bearer" = [])),
    params(("task_id" = String, Path, description = "Task ID")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 403, description = "Read-only member", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn delete_task(
    AuthUser { user_id, .. }: AuthUser,
    OriginConnection(origin): OriginConnection,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (_, grant) = task_access(&state, &user_id, &task_id).await?;
    require_write(&grant)?;

    let deleted = state.ordering.remove(&task_id).await?;
    state.fanout.to_project(
        &deleted.project_id,
        event::TASK_DELETED,
        &TaskDeleted {
            task_id: deleted.id.clone(),
            project_id: deleted.project_id.clone(),
            status: deleted.status,
        },
        origin.as_deref(),
    );
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// PUT /api/v1/tasks/{task_id}/assignee
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskRequest {
    /// `null` unassigns.
    pub assignee_id: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/v1/tasks/{task_id}/assignee",
    tag = "Tasks",
    security(("bearer" = [])),
    params(("task_id" = String, Path, description = "Task ID")),
    request_body = AssignTaskRequest,
    responses(
        (status = 200, description = "Assignee changed", body = Task),
        (status = 400, description = "Assignee is not a member", body = ApiErrorBody),
        (status = 403, description = "Read-only member", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn assign_task(
    AuthUser { user_id, .. }: AuthUser,
    OriginConnection(origin): OriginConnection,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<AssignTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let (task, grant) = task_access(&state, &user_id, &task_id).await?;
    require_write(&grant)?;

    let assignee_id = body.assignee_id.filter(|id| !id.trim().is_empty());
    if let Some(assignee_id) = &assignee_id {
        if state
            .store
            .get_membership(&task.project_id, assignee_id)
            .await?
            .is_none()
        {
            return Err(ApiError::validation(vec![FieldError::new(
                "assigneeId",
                "Assignee is not a project member",
            )]));
        }
    }

    let updated = state
        .store
        .assign_task(&task_id, assignee_id.as_deref())
        .await?;

    state.fanout.to_project(
        &updated.project_id,
        event::TASK_ASSIGNED,
        &TaskAssigned {
            task: updated.clone(),
            previous_assignee_id: task.assignee_id.clone(),
        },
        origin.as_deref(),
    );

    if let Some(assignee_id) = updated
        .assignee_id
        .as_deref()
        .filter(|id| *id != user_id && task.assignee_id.as_deref() != Some(*id))
    {
        notify_assignee(&state, &updated, assignee_id).await;
    }

    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/tasks/{task_id}/move
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskRequest {
    pub status: TaskStatus,
    /// Zero-based index in the caller's reordered column.
    pub index: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskResponse {
    pub task: Task,
    #[schema(value_type = Object)]
    pub moved: TaskMoved,
}

#[utoipa::path(
    put,
    path = "/api/v1/tasks/{task_id}/move",
    tag = "Tasks",
    security(("bearer" = [])),
    params(("task_id" = String, Path, description = "Task ID")),
    request_body = MoveTaskRequest,
    responses(
        (status = 200, description = "Task moved; authoritative column order", body = MoveTaskResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Read-only member", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn move_task(
    AuthUser { user_id, .. }: AuthUser,
    OriginConnection(origin): OriginConnection,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<MoveTaskRequest>,
) -> Result<Json<MoveTaskResponse>, ApiError> {
    let index = usize::try_from(body.index).map_err(|_| {
        ApiError::validation(vec![FieldError::new("index", "Index must not be negative")])
    })?;

    let outcome = state
        .ordering
        .move_task(&user_id, &task_id, body.status, index)
        .await?;

    let moved = TaskMoved {
        task_id: outcome.task.id.clone(),
        project_id: outcome.task.project_id.clone(),
        from_status: outcome.from_status,
        status: outcome.task.status,
        position: outcome.task.position,
        order: outcome.order,
        source_order: outcome.source_order,
    };
    state.fanout.to_project(
        &moved.project_id,
        event::TASK_MOVED,
        &moved,
        origin.as_deref(),
    );

    Ok(Json(MoveTaskResponse {
        task: outcome.task,
        moved,
    }))
}
