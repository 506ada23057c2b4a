//! Per-task rooms. Task content itself changes over REST; this module only
//! gates who hears about it.

use serde_json::Value;
use teamboard_common::protocol::scoped_id;

use crate::gateway::error::GatewayError;
use crate::gateway::rooms::RoomKey;
use crate::gateway::session::ConnectionSession;
use crate::AppState;

use super::authorize;

fn task_room(data: &Value) -> Result<RoomKey, GatewayError> {
    scoped_id(data, "taskId")
        .map(RoomKey::Task)
        .ok_or_else(|| GatewayError::validation("taskId is required"))
}

/// `task:join`: same project-membership check as the project room.
pub async fn join(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let room = task_room(&data)?;
    authorize(state, session, &room).await?;
    state.rooms.join(&session.handle, &room);
    Ok(())
}

pub async fn leave(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let room = task_room(&data)?;
    state.rooms.leave(session.id(), &room);
    session.memberships.forget(&room);
    Ok(())
}
