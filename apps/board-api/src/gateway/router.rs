//! Event Router: dispatches inbound client events to domain handlers.

use teamboard_common::protocol::{event, ClientFrame};

use crate::AppState;

use super::error::GatewayError;
use super::handlers::{self, chat, notification, presence, project, task};
use super::rooms::RoomKey;
use super::session::ConnectionSession;

/// Set up a freshly authenticated connection: private room and presence.
pub async fn connected(state: &AppState, session: &ConnectionSession) {
    let user_id = &session.identity().user_id;
    state
        .rooms
        .join(&session.handle, &RoomKey::User(user_id.clone()));

    if state.presence.connect(user_id) {
        if let Err(e) = state.presence.record(state.store.as_ref(), user_id).await {
            tracing::warn!(?e, %user_id, "failed to record online presence");
        }
    }
}

/// Tear down a closed connection. Room membership is removed before anything
/// else runs so nothing more is delivered to it.
pub async fn disconnected(state: &AppState, session: &ConnectionSession) {
    let rooms = state.rooms.leave_all(session.id());
    tracing::debug!(connection_id = %session.id(), rooms = rooms.len(), "left all rooms");
    presence::disconnected(state, session, &rooms).await;
}

/// Re-check every project and task room this connection sits in. Rooms the
/// user has lost access to are left; a store failure keeps the room until the
/// next sweep.
pub async fn revalidate(state: &AppState, session: &ConnectionSession) {
    for room in state.rooms.rooms_of(session.id()) {
        if matches!(room, RoomKey::User(_)) {
            continue;
        }
        match handlers::authorize(state, session, &room).await {
            Ok(_) | Err(GatewayError::AccessDenied) => {}
            Err(e) => tracing::warn!(
                ?e,
                connection_id = %session.id(),
                room = %room,
                "membership recheck failed"
            ),
        }
    }
}

/// Route one client frame. Failures are reported to this connection only.
pub async fn dispatch(state: &AppState, session: &ConnectionSession, frame: ClientFrame) {
    let ClientFrame { t, d } = frame;

    let result = match t.as_str() {
        event::PROJECT_JOIN => project::join(state, session, d).await,
        event::PROJECT_LEAVE => project::leave(state, session, d).await,
        event::CHAT_MESSAGE => chat::send(state, session, d).await,
        event::CHAT_TYPING => chat::typing(state, session, d).await,
        event::CHAT_READ => chat::read(state, session, d).await,
        event::TASK_JOIN => task::join(state, session, d).await,
        event::TASK_LEAVE => task::leave(state, session, d).await,
        event::PRESENCE_ONLINE => presence::online(state, session, d).await,
        event::PRESENCE_GET => presence::get(state, session, d).await,
        event::NOTIFICATION_JOIN => notification::join(state, session, d).await,
        other => Err(GatewayError::validation(format!("Unknown event: {other}"))),
    };

    if let Err(err) = result {
        match &err {
            GatewayError::AccessDenied => tracing::info!(
                connection_id = %session.id(),
                user_id = %session.identity().user_id,
                event = %t,
                "event denied"
            ),
            GatewayError::Validation(reason) => tracing::debug!(
                connection_id = %session.id(),
                event = %t,
                %reason,
                "event rejected"
            ),
            GatewayError::Persistence(_) => {}
        }
        session.fail(&err, Some(&t));
    }
}
