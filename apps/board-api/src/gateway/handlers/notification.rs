use serde_json::Value;
use teamboard_common::model::Notification;
use teamboard_common::protocol::event;

use crate::db::store::{NewNotification, StoreResult};
use crate::gateway::error::GatewayError;
use crate::gateway::rooms::RoomKey;
use crate::gateway::session::ConnectionSession;
use crate::AppState;

/// `notification:join`. The user room is joined at connect time; this only
/// makes sure it still is.
pub async fn join(
    state: &AppState,
    session: &ConnectionSession,
    _data: Value,
) -> Result<(), GatewayError> {
    let room = RoomKey::User(session.identity().user_id.clone());
    state.rooms.join(&session.handle, &room);
    tracing::debug!(connection_id = %session.id(), "notification stream joined");
    Ok(())
}

/// Persist a notification and push it to the recipient's private room.
pub async fn emit(state: &AppState, notification: NewNotification) -> StoreResult<Notification> {
    let stored = state.store.create_notification(notification).await?;
    state
        .fanout
        .to_user(&stored.user_id, event::NOTIFICATION_NEW, &stored);
    Ok(stored)
}
