//! Project snapshot and task creation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use teamboard_common::id::{prefix, prefixed_ulid};
use teamboard_common::model::{Member, Project, ProjectRole, Task, TaskPriority, TaskStatus};
use teamboard_common::protocol::event;
use utoipa::ToSchema;

use crate::auth::middleware::{AuthUser, OriginConnection};
use crate::db::store::{NewNotification, NewTask};
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::handlers::notification;
use crate::AppState;

use super::{project_access, require_write};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects/{project_id}", get(get_project))
        .route(
            "/projects/{project_id}/tasks",
            get(list_tasks).post(create_task),
        )
}

pub const MAX_TITLE_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// GET /api/v1/projects/{project_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub project: Project,
    pub members: Vec<Member>,
    pub role: ProjectRole,
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}",
    tag = "Projects",
    security(("bearer" = [])),
    params(("project_id" = String, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Project and members", body = ProjectSnapshot),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn get_project(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectSnapshot>, ApiError> {
    let grant = project_access(&state, &user_id, &project_id).await?;

    let project = state
        .store
        .get_project(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    let members = state.store.list_members(&project_id).await?;

    Ok(Json(ProjectSnapshot {
        project,
        members,
        role: grant.role,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/projects/{project_id}/tasks
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/tasks",
    tag = "Projects",
    security(("bearer" = [])),
    params(("project_id" = String, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Tasks ordered by status, then position", body = [Task]),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn list_tasks(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Task>>, ApiError> {
    project_access(&state, &user_id, &project_id).await?;
    Ok(Json(state.store.list_tasks(&project_id).await?))
}

// ---------------------------------------------------------------------------
// POST /api/v1/projects/{project_id}/tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/tasks",
    tag = "Projects",
    security(("bearer" = [])),
    params(("project_id" = String, Path, description = "Project ID")),
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created at the end of its column", body = Task),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Read-only member", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn create_task(
    AuthUser { user_id, .. }: AuthUser,
    OriginConnection(origin): OriginConnection,
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let grant = project_access(&state, &user_id, &project_id).await?;
    require_write(&grant)?;

    let title = body.title.as_deref().map(str::trim).unwrap_or_default();
    let mut errors = Vec::new();
    if title.is_empty() {
        errors.push(FieldError::new("title", "Title is required"));
    } else if title.chars().count() > MAX_TITLE_CHARS {
        errors.push(FieldError::new(
            "title",
            format!("Title must be {MAX_TITLE_CHARS} characters or fewer"),
        ));
    }
    if let Some(assignee_id) = &body.assignee_id {
        if state
            .store
            .get_membership(&project_id, assignee_id)
            .await?
            .is_none()
        {
            errors.push(FieldError::new("assigneeId", "Assignee is not a project member"));
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let task = state
        .ordering
        .append(NewTask {
            id: prefixed_ulid(prefix::TASK),
            project_id: project_id.clone(),
            title: title.to_string(),
            description: body
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            status: body.status.unwrap_or(TaskStatus::Todo),
            priority: body.priority.unwrap_or_default(),
            assignee_id: body.assignee_id,
            created_by: user_id.clone(),
        })
        .await?;

    state
        .fanout
        .to_project(&project_id, event::TASK_CREATED, &task, origin.as_deref());

    if let Some(assignee_id) = task.assignee_id.as_deref().filter(|id| *id != user_id) {
        notify_assignee(&state, &task, assignee_id).await;
    }

    Ok((StatusCode::CREATED, Json(task)))
}

/// Tell a new assignee. The mutation is already committed, so a failure here
/// is logged rather than returned.
pub(crate) async fn notify_assignee(state: &AppState, task: &Task, assignee_id: &str) {
    let result = notification::emit(
        state,
        NewNotification {
            id: state.snowflake.generate(),
            user_id: assignee_id.to_string(),
            kind: "task_assigned".to_string(),
            title: format!("You were assigned to \"{}\"", task.title),
            body: None,
            project_id: Some(task.project_id.clone()),
            task_id: Some(task.id.clone()),
        },
    )
    .await;

    if let Err(e) = result {
        tracing::error!(?e, task_id = %task.id, %assignee_id, "failed to store assignment notification");
    }
}
