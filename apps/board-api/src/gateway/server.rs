//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use teamboard_common::id::{prefix, prefixed_ulid};
use teamboard_common::model::UserSummary;
use teamboard_common::protocol::{event, ClientFrame, ServerFrame, SessionReady};
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::middleware::bearer_token;
use crate::auth::{authenticate, Identity};
use crate::error::ApiError;
use crate::AppState;

use super::error::GatewayError;
use super::rooms::{ConnectionHandle, Envelope};
use super::router;
use super::session::ConnectionSession;

/// Close codes (4000-range for application-level).
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Envelopes buffered per connection before new ones are dropped.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

/// Authenticate before upgrading. A refused handshake is a plain 401; no
/// socket is ever opened for it.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers).or(query.token.as_deref());

    match authenticate(state.store.as_ref(), &state.config.jwt_secret, token).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| handle_connection(socket, state, identity))
            .into_response(),
        Err(failure) => {
            tracing::info!(reason = %failure, "gateway handshake rejected");
            ApiError::unauthorized(failure.to_string()).into_response()
        }
    }
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

    let connection_id = prefixed_ulid(prefix::CONNECTION);
    let session = ConnectionSession::new(ConnectionHandle::new(connection_id, identity, out_tx));

    // session:ready goes out before the connection can be reached by any room.
    let ready = SessionReady {
        connection_id: session.id().to_string(),
        user: UserSummary {
            id: session.identity().user_id.clone(),
            name: session.identity().name.clone(),
        },
        heartbeat_interval: state.config.heartbeat_interval_ms,
    };
    let ready = match serde_json::to_value(&ready) {
        Ok(data) => session.direct_frame(event::SESSION_READY, data),
        Err(e) => {
            tracing::error!(?e, "failed to encode session:ready");
            return;
        }
    };
    if !write_frame(&mut ws_tx, &ready).await {
        return;
    }

    router::connected(&state, &session).await;
    tracing::info!(
        connection_id = %session.id(),
        user_id = %session.identity().user_id,
        "gateway connection established"
    );

    run_session(&state, &session, ws_tx, ws_rx, out_rx).await;

    router::disconnected(&state, &session).await;
    tracing::info!(
        connection_id = %session.id(),
        user_id = %session.identity().user_id,
        "gateway connection ended"
    );
}

/// Main session loop: read client frames, drain the outbound queue, enforce
/// heartbeat and periodically re-check room membership.
async fn run_session(
    state: &AppState,
    session: &ConnectionSession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut out_rx: mpsc::Receiver<Arc<Envelope>>,
) {
    // Client must heartbeat within 1.5× the announced interval.
    let heartbeat_deadline = Duration::from_millis(state.config.heartbeat_interval_ms * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    let recheck_every = state.config.membership_recheck_ms;
    let mut recheck_timer = time::interval(Duration::from_millis(recheck_every.max(1)));
    recheck_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    recheck_timer.tick().await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame: ClientFrame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(_) => {
                                session.fail(&GatewayError::validation("Invalid JSON"), None);
                                continue;
                            }
                        };

                        if frame.t == event::HEARTBEAT {
                            got_heartbeat = true;
                            session.reply(event::HEARTBEAT_ACK, &serde_json::json!({}));
                            continue;
                        }

                        router::dispatch(state, session, frame).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.id(), "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            envelope = out_rx.recv() => {
                let Some(envelope) = envelope else { break };
                let frame = session.frame(&envelope);
                if !write_frame(&mut ws_tx, &frame).await {
                    break;
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %session.id(),
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }

            _ = recheck_timer.tick(), if recheck_every > 0 => {
                router::revalidate(state, session).await;
            }
        }
    }
}

async fn write_frame(ws_tx: &mut WsSink, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(?e, event = %frame.t, "failed to encode frame");
            true
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
