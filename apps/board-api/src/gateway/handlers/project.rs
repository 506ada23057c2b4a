use serde_json::Value;
use teamboard_common::protocol::{event, scoped_id, ProjectRef};

use crate::gateway::error::GatewayError;
use crate::gateway::rooms::RoomKey;
use crate::gateway::session::ConnectionSession;
use crate::AppState;

use super::authorize;

fn project_id(data: &Value) -> Result<String, GatewayError> {
    scoped_id(data, "projectId").ok_or_else(|| GatewayError::validation("projectId is required"))
}

/// `project:join`: authorize, then subscribe to the project room.
pub async fn join(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let project_id = project_id(&data)?;
    let room = RoomKey::Project(project_id.clone());
    authorize(state, session, &room).await?;

    state.rooms.join(&session.handle, &room);
    tracing::info!(
        connection_id = %session.id(),
        user_id = %session.identity().user_id,
        %project_id,
        "joined project room"
    );
    session.reply(event::PROJECT_JOINED, &ProjectRef { project_id });
    Ok(())
}

/// `project:leave`. Leaving a room you are not in is a no-op.
pub async fn leave(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let room = RoomKey::Project(project_id(&data)?);
    state.rooms.leave(session.id(), &room);
    session.memberships.forget(&room);
    Ok(())
}
