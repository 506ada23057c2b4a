//! Task comments. New comments are pushed to the task's room.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use teamboard_common::model::{Comment, Page};
use teamboard_common::protocol::event;
use utoipa::ToSchema;

use crate::auth::middleware::{AuthUser, OriginConnection};
use crate::db::store::{NewComment, NewNotification};
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::handlers::notification;
use crate::AppState;

use super::{require_write, task_access, CursorParams};

pub const MAX_COMMENT_CHARS: usize = 4000;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/tasks/{task_id}/comments",
        get(list_comments).post(add_comment),
    )
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/comments",
    tag = "Comments",
    security(("bearer" = [])),
    params(
        ("task_id" = String, Path, description = "Task ID"),
        ("cursor" = Option<String>, Query, description = "Cursor: oldest comment ID already seen"),
        ("limit" = Option<i64>, Query, description = "Number of comments (1-100, default 50)"),
    ),
    responses(
        (status = 200, description = "Comments, newest first", body = Page<Comment>),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn list_comments(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<CursorParams>,
) -> Result<Json<Page<Comment>>, ApiError> {
    task_access(&state, &user_id, &task_id).await?;
    let (cursor, limit) = params.resolve()?;

    let rows = state.store.list_comments(&task_id, cursor, limit + 1).await?;
    Ok(Json(Page::from_overfetch(rows, limit, |c| c.id.to_string())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCommentRequest {
    pub content: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/comments",
    tag = "Comments",
    security(("bearer" = [])),
    params(("task_id" = String, Path, description = "Task ID")),
    request_body = AddCommentRequest,
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Read-only member", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn add_comment(
    AuthUser { user_id, name }: AuthUser,
    OriginConnection(origin): OriginConnection,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<AddCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let (task, grant) = task_access(&state, &user_id, &task_id).await?;
    require_write(&grant)?;

    let content = body.content.as_deref().map(str::trim).unwrap_or_default();
    if content.is_empty() {
        return Err(ApiError::validation(vec![FieldError::new(
            "content",
            "Comment content is required",
        )]));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::validation(vec![FieldError::new(
            "content",
            format!("Comment content must be {MAX_COMMENT_CHARS} characters or fewer"),
        )]));
    }

    let comment = state
        .store
        .create_comment(NewComment {
            id: state.snowflake.generate(),
            task_id: task_id.clone(),
            author_id: user_id.clone(),
            content: content.to_string(),
        })
        .await?;

    state
        .fanout
        .to_task(&task_id, event::COMMENT_ADDED, &comment, origin.as_deref());

    if let Some(assignee_id) = task.assignee_id.as_deref().filter(|id| *id != user_id) {
        let result = notification::emit(
            &state,
            NewNotification {
                id: state.snowflake.generate(),
                user_id: assignee_id.to_string(),
                kind: "comment_added".to_string(),
                title: format!("{name} commented on \"{}\"", task.title),
                body: Some(comment.content.clone()),
                project_id: Some(task.project_id.clone()),
                task_id: Some(task.id.clone()),
            },
        )
        .await;
        if let Err(e) = result {
            tracing::error!(?e, %task_id, "failed to store comment notification");
        }
    }

    Ok((StatusCode::CREATED, Json(comment)))
}
