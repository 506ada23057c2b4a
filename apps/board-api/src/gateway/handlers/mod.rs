//! Per-domain handlers for inbound client events.

pub mod chat;
pub mod notification;
pub mod presence;
pub mod project;
pub mod task;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::AppState;

use super::error::GatewayError;
use super::oracle::Grant;
use super::rooms::RoomKey;
use super::session::ConnectionSession;

/// Decode an event payload, mapping serde errors to a validation failure.
pub(crate) fn decode<T: DeserializeOwned>(data: Value, what: &str) -> Result<T, GatewayError> {
    serde_json::from_value(data).map_err(|e| {
        tracing::debug!(?e, what, "malformed payload");
        GatewayError::validation(format!("Invalid {what} payload"))
    })
}

/// Ask the oracle about `room` for this connection. A denial for a room the
/// connection is still in evicts it, so revoked access stops receiving
/// broadcasts.
pub(crate) async fn authorize(
    state: &AppState,
    session: &ConnectionSession,
    room: &RoomKey,
) -> Result<Grant, GatewayError> {
    let result = state
        .oracle
        .authorize(&session.identity().user_id, room, Some(&session.memberships))
        .await;

    if result == Err(GatewayError::AccessDenied) && state.rooms.leave(session.id(), room) {
        tracing::info!(
            connection_id = %session.id(),
            user_id = %session.identity().user_id,
            room = %room,
            "membership revoked, removed from room"
        );
    }
    result
}
