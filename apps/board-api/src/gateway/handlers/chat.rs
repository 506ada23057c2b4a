//! Chat: persisted messages, advisory typing indicators, read receipts.

use serde_json::Value;
use teamboard_common::model::MessageType;
use teamboard_common::protocol::{
    event, ChatSendPayload, ReadBroadcast, ReadPayload, TypingBroadcast, TypingPayload,
};

use crate::db::store::{NewMessage, StoreError};
use crate::gateway::error::GatewayError;
use crate::gateway::rooms::RoomKey;
use crate::gateway::session::ConnectionSession;
use crate::AppState;

use super::{authorize, decode};

pub const MAX_CONTENT_CHARS: usize = 4000;

/// Check and normalize an outgoing chat message.
pub fn validate_message(payload: &mut ChatSendPayload) -> Result<(), GatewayError> {
    payload.content = payload.content.trim().to_string();
    payload.file_url = payload
        .file_url
        .take()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    if payload.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(GatewayError::validation(format!(
            "Message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    match payload.kind {
        MessageType::Text if payload.content.is_empty() => {
            Err(GatewayError::validation("Message content is required"))
        }
        MessageType::File | MessageType::Image if payload.file_url.is_none() => Err(
            GatewayError::validation(format!("fileUrl is required for {} messages", payload.kind.as_str())),
        ),
        _ => Ok(()),
    }
}

/// `chat:message`: persist first, then broadcast the stored record to the
/// whole project room, sender included.
pub async fn send(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let mut payload: ChatSendPayload = decode(data, "chat message")?;
    validate_message(&mut payload)?;
    let room = RoomKey::Project(payload.project_id.clone());
    authorize(state, session, &room).await?;

    let message = state
        .store
        .create_message(NewMessage {
            id: state.snowflake.generate(),
            project_id: payload.project_id,
            author_id: session.identity().user_id.clone(),
            content: payload.content,
            kind: payload.kind,
            file_url: payload.file_url,
        })
        .await
        .map_err(|e| {
            tracing::error!(?e, connection_id = %session.id(), "failed to persist chat message");
            GatewayError::Persistence("Failed to send message")
        })?;

    state.fanout.emit(room, event::CHAT_MESSAGE, &message, None);
    Ok(())
}

/// `chat:typing`: broadcast only, never to the typist.
pub async fn typing(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let payload: TypingPayload = decode(data, "typing")?;
    let room = RoomKey::Project(payload.project_id.clone());
    authorize(state, session, &room).await?;

    let identity = session.identity();
    state.fanout.emit(
        room,
        event::CHAT_TYPING,
        &TypingBroadcast {
            project_id: payload.project_id,
            user_id: identity.user_id.clone(),
            user_name: identity.name.clone(),
            is_typing: payload.is_typing,
        },
        Some(session.id()),
    );
    Ok(())
}

/// `chat:read`: upsert a receipt and tell the message's project room.
pub async fn read(
    state: &AppState,
    session: &ConnectionSession,
    data: Value,
) -> Result<(), GatewayError> {
    let payload: ReadPayload = decode(data, "read receipt")?;

    // An unknown message is reported exactly like a forbidden one.
    let message = state
        .store
        .get_message(payload.message_id)
        .await
        .map_err(|e| {
            tracing::error!(?e, "failed to load message for receipt");
            GatewayError::Persistence("Failed to mark message as read")
        })?
        .ok_or(GatewayError::AccessDenied)?;

    let room = RoomKey::Project(message.project_id.clone());
    authorize(state, session, &room).await?;

    let receipt = state
        .store
        .upsert_read_receipt(message.id, &session.identity().user_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => GatewayError::AccessDenied,
            e => {
                tracing::error!(?e, "failed to persist read receipt");
                GatewayError::Persistence("Failed to mark message as read")
            }
        })?;

    state.fanout.emit(
        room,
        event::CHAT_READ,
        &ReadBroadcast {
            message_id: receipt.message_id,
            project_id: message.project_id,
            user_id: receipt.user_id,
            read_at: receipt.read_at,
        },
        None,
    );
    Ok(())
}
