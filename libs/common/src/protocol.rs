//! Gateway event names, frames, and payloads.
//!
//! Client → server frames are `{ "t": <event>, "d": <payload> }`. Server →
//! client frames add a per-connection sequence number `s` and the server
//! timestamp `ts`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::id_string;
use crate::model::{MessageType, Task, TaskPosition, TaskStatus, UserSummary};

/// Event names, grouped by the domain that owns them.
pub mod event {
    pub const SESSION_READY: &str = "session:ready";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_ACK: &str = "heartbeat:ack";
    pub const ERROR: &str = "error";

    pub const PROJECT_JOIN: &str = "project:join";
    pub const PROJECT_LEAVE: &str = "project:leave";
    pub const PROJECT_JOINED: &str = "project:joined";

    pub const CHAT_MESSAGE: &str = "chat:message";
    pub const CHAT_TYPING: &str = "chat:typing";
    pub const CHAT_READ: &str = "chat:read";

    pub const TASK_JOIN: &str = "task:join";
    pub const TASK_LEAVE: &str = "task:leave";
    pub const TASK_CREATED: &str = "task:created";
    pub const TASK_UPDATED: &str = "task:updated";
    pub const TASK_DELETED: &str = "task:deleted";
    pub const TASK_ASSIGNED: &str = "task:assigned";
    pub const TASK_MOVED: &str = "task:moved";
    /// Never sent over the socket. The client tags its own failed move
    /// requests with it.
    pub const TASK_MOVE: &str = "task:move";
    pub const COMMENT_ADDED: &str = "comment:added";

    pub const PRESENCE_ONLINE: &str = "presence:online";
    pub const PRESENCE_OFFLINE: &str = "presence:offline";
    pub const PRESENCE_GET: &str = "presence:get";
    pub const PRESENCE_LIST: &str = "presence:list";

    pub const NOTIFICATION_JOIN: &str = "notification:join";
    pub const NOTIFICATION_NEW: &str = "notification:new";
}

/// A frame sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub t: String,
    #[serde(default)]
    pub d: Value,
}

impl ClientFrame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            t: event.to_string(),
            d: data,
        }
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    pub t: String,
    pub s: u64,
    pub ts: DateTime<Utc>,
    pub d: Value,
}

/// Read an id that may arrive either bare (`"tsk_..."`) or wrapped in an
/// object (`{ "taskId": "tsk_..." }`).
pub fn scoped_id(data: &Value, key: &str) -> Option<String> {
    let raw = match data {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get(key).and_then(Value::as_str),
        _ => None,
    }?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Client → server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendPayload {
    pub project_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub project_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPayload {
    #[serde(with = "id_string")]
    pub message_id: i64,
}

// ---------------------------------------------------------------------------
// Server → client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReady {
    pub connection_id: String,
    pub user: UserSummary,
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub project_id: String,
    pub user_id: String,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadBroadcast {
    #[serde(with = "id_string")]
    pub message_id: i64,
    pub project_id: String,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceOffline {
    pub user_id: String,
    pub user_name: String,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceList {
    pub project_id: String,
    pub online_users: Vec<PresenceUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMoved {
    pub task_id: String,
    pub project_id: String,
    pub from_status: TaskStatus,
    pub status: TaskStatus,
    pub position: i32,
    /// Authoritative order of the destination column after the move.
    pub order: Vec<TaskPosition>,
    /// Authoritative order of the source column, when the task changed column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_order: Option<Vec<TaskPosition>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeleted {
    pub task_id: String,
    pub project_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssigned {
    pub task: Task,
    pub previous_assignee_id: Option<String>,
}
