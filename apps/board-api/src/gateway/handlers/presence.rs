//! Presence: announcements on `online`, snapshots on `get`, and the implicit
//! offline pass when a connection closes.

use chrono::Utc;
use serde_json::Value;
use teamboard_common::protocol::{
    event, scoped_id, PresenceList, PresenceOffline, PresenceUser,
};

use crate::gateway::error::GatewayError;
use crate::gateway::rooms::RoomKey;
use crate::gateway::session::ConnectionSession;
use crate::AppState;

use super::authorize;

/// `presence:online`: mark the durable record online and announce the user to
/// every project they are a member of, whether or not this connection has
/// joined those rooms.
pub async fn online(
    state: &AppState,
    session: &ConnectionSession,
    _data: Value,
) -> Result<(), GatewayError> {
    let identity = session.identity();

    state
        .presence
        .record(state.store.as_ref(), &identity.user_id)
        .await
        .map_err(|e| {
            tracing::error!(?e, user_id = %identity.user_id, "failed to update presence");
            GatewayError::Persistence("Failed to update presence")
        })?;

    let project_ids = state
        .store
        .project_ids_for_user(&identity.user_id)
        .await
        .map_err(|e| {
            tracing::error!(?e, user_id = %identity.user_id, "failed to load memberships");
            GatewayError::Persistence("Failed to update presence")
        })?;

    let announcement = PresenceUser {
        user_id: identity.user_id.clone(),
        user_name: identity.name.clone(),
    };
    for project_id in &project_ids {
        state.fanout.to_project(
            project_id,
            event::PRESENCE_ONLINE,
            &announcement,
            Some(session.id()),
        );
    }
    Ok(())
}

/// `presence:get`: who is connected to the project room right now.
pub async fn get(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let project_id =
        scoped_id(&data, "projectId").ok_or_else(|| GatewayError::validation("projectId is required"))?;
    let room = RoomKey::Project(project_id.clone());
    authorize(state, session, &room).await?;

    let online_users = state
        .rooms
        .members_of(&room)
        .into_iter()
        .map(|identity| PresenceUser {
            user_id: identity.user_id,
            user_name: identity.name,
        })
        .collect();

    session.reply(
        event::PRESENCE_LIST,
        &PresenceList {
            project_id,
            online_users,
        },
    );
    Ok(())
}

/// Runs after the connection has left every room. `rooms` are the rooms it
/// was in at that moment; each project room hears `presence:offline` once,
/// unless the same user is still connected there from elsewhere.
pub async fn disconnected(state: &AppState, session: &ConnectionSession, rooms: &[RoomKey]) {
    let identity = session.identity();
    let last_connection = state.presence.disconnect(&identity.user_id);

    let mut last_active_at = Utc::now();
    if last_connection {
        match state.presence.record(state.store.as_ref(), &identity.user_id).await {
            Ok(record) => last_active_at = record.last_active_at,
            Err(e) => {
                tracing::warn!(?e, user_id = %identity.user_id, "failed to record offline presence");
            }
        }
    }

    let payload = PresenceOffline {
        user_id: identity.user_id.clone(),
        user_name: identity.name.clone(),
        last_active_at,
    };
    for room in rooms {
        if !matches!(room, RoomKey::Project(_)) {
            continue;
        }
        if state.rooms.user_connections_in(room, &identity.user_id) > 0 {
            continue;
        }
        state
            .fanout
            .emit(room.clone(), event::PRESENCE_OFFLINE, &payload, None);
    }
}
