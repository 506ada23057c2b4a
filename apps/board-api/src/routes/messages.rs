//! Chat history. New messages arrive over the gateway.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use teamboard_common::model::{ChatMessage, Page};

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

use super::{project_access, CursorParams};

pub fn router() -> Router<AppState> {
    Router::new().route("/projects/{project_id}/messages", get(list_messages))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/messages",
    tag = "Messages",
    security(("bearer" = [])),
    params(
        ("project_id" = String, Path, description = "Project ID"),
        ("cursor" = Option<String>, Query, description = "Cursor: oldest message ID already seen"),
        ("limit" = Option<i64>, Query, description = "Number of messages (1-100, default 50)"),
    ),
    responses(
        (status = 200, description = "Messages, newest first", body = Page<ChatMessage>),
        (status = 400, description = "Bad cursor", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn list_messages(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(params): Query<CursorParams>,
) -> Result<Json<Page<ChatMessage>>, ApiError> {
    project_access(&state, &user_id, &project_id).await?;
    let (cursor, limit) = params.resolve()?;

    let rows = state
        .store
        .list_messages(&project_id, cursor, limit + 1)
        .await?;
    Ok(Json(Page::from_overfetch(rows, limit, |m| m.id.to_string())))
}
