//! Per-project sync state machine.
//!
//! `Idle → Hydrating → Joined ⇄ Reconnecting → Exited`. Room membership is
//! scoped to a socket, so every `session:ready` re-sends `project:join` for
//! the current project. Events missed while reconnecting are never replayed;
//! [`ResyncPolicy`] decides whether the snapshot is fetched again instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use teamboard_common::model::{ChatMessage, Notification, Task, TaskStatus};
use teamboard_common::protocol::{
    event, ClientFrame, ErrorPayload, PresenceList, PresenceOffline, PresenceUser, ProjectRef,
    ReadBroadcast, ServerFrame, SessionReady, TaskAssigned, TaskDeleted, TaskMoved,
    TypingBroadcast,
};

use crate::error::{ClientError, ClientResult};
use crate::hydrate::Hydrator;
use crate::transport::{Transport, TransportEvent};
use crate::view::{ColumnBackup, ProjectView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Hydrating,
    Joined,
    Reconnecting,
    Exited,
}

/// Whether a reconnect re-fetches the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResyncPolicy {
    #[default]
    Always,
    Never,
}

pub struct SyncController {
    transport: Arc<dyn Transport>,
    hydrator: Arc<dyn Hydrator>,
    policy: ResyncPolicy,
    state: SyncState,
    project_id: Option<String>,
    view: Option<ProjectView>,
    connection_id: Option<String>,
    /// Optimistic moves awaiting the server, keyed by task id.
    pending: HashMap<String, Vec<ColumnBackup>>,
    notifications: Vec<Notification>,
    last_error: Option<ErrorPayload>,
}

impl SyncController {
    pub fn new(transport: Arc<dyn Transport>, hydrator: Arc<dyn Hydrator>) -> Self {
        Self {
            transport,
            hydrator,
            policy: ResyncPolicy::default(),
            state: SyncState::Idle,
            project_id: None,
            view: None,
            connection_id: None,
            pending: HashMap::new(),
            notifications: Vec::new(),
            last_error: None,
        }
    }

    pub fn with_policy(mut self, policy: ResyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn view(&self) -> Option<&ProjectView> {
        self.view.as_ref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// The most recent failure worth surfacing as a toast: an `error` event
    /// from the gateway, or a rejected move tagged `task:move`.
    pub fn take_error(&mut self) -> Option<ErrorPayload> {
        self.last_error.take()
    }

    pub fn has_pending_move(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
    }

    // -- lifecycle -----------------------------------------------------------

    /// Hydrate `project_id` and join its room. Entering a different project
    /// leaves the current one first.
    pub async fn enter(&mut self, project_id: &str) -> ClientResult<()> {
        if self.project_id.as_deref() == Some(project_id) && self.view.is_some() {
            return Ok(());
        }
        if self.project_id.is_some() {
            self.exit().await;
        }

        self.state = SyncState::Hydrating;
        let snapshot = match self.hydrator.snapshot(project_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state = SyncState::Idle;
                return Err(e);
            }
        };

        self.project_id = Some(project_id.to_string());
        self.view = Some(ProjectView::from_snapshot(snapshot));

        if self.transport.is_connected() {
            self.state = SyncState::Joined;
            self.send_join(project_id).await;
        } else {
            // The join goes out with the next `session:ready`.
            self.state = SyncState::Reconnecting;
        }
        tracing::info!(%project_id, state = ?self.state, "entered project");
        Ok(())
    }

    /// Leave the room and drop everything held for the project.
    pub async fn exit(&mut self) {
        let Some(project_id) = self.project_id.take() else {
            return;
        };
        if self.transport.is_connected() {
            let frame = ClientFrame::new(event::PROJECT_LEAVE, ref_payload(&project_id));
            if let Err(e) = self.transport.send(frame).await {
                tracing::debug!(error = %e, %project_id, "leave not sent");
            }
        }
        self.view = None;
        self.pending.clear();
        self.state = SyncState::Exited;
        tracing::info!(%project_id, "exited project");
    }

    async fn send_join(&self, project_id: &str) {
        let frame = ClientFrame::new(event::PROJECT_JOIN, ref_payload(project_id));
        if let Err(e) = self.transport.send(frame).await {
            tracing::warn!(error = %e, %project_id, "project join not sent");
        }
    }

    async fn on_session_ready(&mut self, session: SessionReady) {
        self.connection_id = Some(session.connection_id);

        let Some(project_id) = self.project_id.clone() else {
            return;
        };
        self.send_join(&project_id).await;

        if self.state != SyncState::Reconnecting {
            return;
        }
        if self.policy == ResyncPolicy::Always {
            self.state = SyncState::Hydrating;
            match self.hydrator.snapshot(&project_id).await {
                Ok(snapshot) => {
                    if let Some(view) = self.view.as_mut() {
                        view.rehydrate(snapshot);
                    }
                    self.pending.clear();
                }
                Err(e) => tracing::warn!(error = %e, %project_id, "resync failed; keeping stale view"),
            }
        }
        self.state = SyncState::Joined;
    }

    fn on_disconnected(&mut self) {
        self.connection_id = None;
        if self.state == SyncState::Joined {
            self.state = SyncState::Reconnecting;
        }
        if let Some(view) = self.view.as_mut() {
            // Presence is re-announced after the rejoin.
            view.replace_online(Vec::new());
        }
    }

    /// Feed one transport event through the state machine.
    pub async fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.handle_frame(frame).await,
            TransportEvent::Disconnected => self.on_disconnected(),
        }
    }

    pub async fn handle_frame(&mut self, frame: ServerFrame) {
        let ServerFrame { t, d, .. } = frame;
        match t.as_str() {
            event::SESSION_READY => {
                if let Some(session) = payload::<SessionReady>(&t, d) {
                    self.on_session_ready(session).await;
                }
            }
            event::ERROR => {
                if let Some(err) = payload::<ErrorPayload>(&t, d) {
                    self.on_error(err);
                }
            }
            event::NOTIFICATION_NEW => {
                if let Some(notification) = payload::<Notification>(&t, d) {
                    self.notifications.push(notification);
                }
            }
            event::PROJECT_JOINED | event::HEARTBEAT_ACK | event::COMMENT_ADDED => {
                tracing::trace!(event = %t, "no view change");
            }
            _ => self.apply(&t, d),
        }
    }

    fn on_error(&mut self, err: ErrorPayload) {
        tracing::warn!(message = %err.message, event = ?err.event, "gateway reported an error");
        self.last_error = Some(err);
    }

    /// Apply a project-scoped event to the view. Anything addressed to
    /// another project is dropped.
    fn apply(&mut self, t: &str, d: Value) {
        let Some(view) = self.view.as_mut() else {
            return;
        };
        let here = view.project_id().to_string();

        match t {
            event::TASK_CREATED | event::TASK_UPDATED => {
                if let Some(task) = payload::<Task>(t, d).filter(|x| x.project_id == here) {
                    view.upsert_task(task);
                }
            }
            event::TASK_ASSIGNED => {
                if let Some(a) = payload::<TaskAssigned>(t, d).filter(|a| a.task.project_id == here) {
                    view.upsert_task(a.task);
                }
            }
            event::TASK_DELETED => {
                if let Some(deleted) = payload::<TaskDeleted>(t, d).filter(|x| x.project_id == here) {
                    self.pending.remove(&deleted.task_id);
                    view.remove_task(&deleted.task_id);
                }
            }
            event::TASK_MOVED => {
                if let Some(moved) = payload::<TaskMoved>(t, d).filter(|m| m.project_id == here) {
                    self.pending.remove(&moved.task_id);
                    view.apply_moved(&moved);
                }
            }
            event::CHAT_MESSAGE => {
                if let Some(message) = payload::<ChatMessage>(t, d).filter(|m| m.project_id == here) {
                    view.set_typing(&message.author_id, false);
                    view.push_message(message);
                }
            }
            event::CHAT_TYPING => {
                if let Some(typing) = payload::<TypingBroadcast>(t, d).filter(|x| x.project_id == here) {
                    view.set_typing(&typing.user_id, typing.is_typing);
                }
            }
            event::CHAT_READ => {
                if let Some(read) = payload::<ReadBroadcast>(t, d).filter(|r| r.project_id == here) {
                    view.mark_read(&read.user_id, read.message_id);
                }
            }
            event::PRESENCE_ONLINE => {
                if let Some(user) = payload::<PresenceUser>(t, d) {
                    view.set_online(user);
                }
            }
            event::PRESENCE_OFFLINE => {
                if let Some(user) = payload::<PresenceOffline>(t, d) {
                    view.set_offline(&user.user_id);
                }
            }
            event::PRESENCE_LIST => {
                if let Some(list) = payload::<PresenceList>(t, d).filter(|l| l.project_id == here) {
                    view.replace_online(list.online_users);
                }
            }
            other => tracing::debug!(event = %other, "unhandled event"),
        }
    }

    // -- outbound ------------------------------------------------------------

    pub async fn send_chat(&self, content: &str) -> ClientResult<()> {
        let project_id = self.project_id.as_deref().ok_or(ClientError::NoProject)?;
        self.transport
            .send(ClientFrame::new(
                event::CHAT_MESSAGE,
                serde_json::json!({ "projectId": project_id, "content": content }),
            ))
            .await
    }

    pub async fn request_presence(&self) -> ClientResult<()> {
        let project_id = self.project_id.as_deref().ok_or(ClientError::NoProject)?;
        self.transport
            .send(ClientFrame::new(event::PRESENCE_GET, ref_payload(project_id)))
            .await
    }

    // -- optimistic moves ----------------------------------------------------

    /// Reorder locally and remember how to undo it.
    pub fn begin_move(&mut self, task_id: &str, status: TaskStatus, index: usize) -> ClientResult<()> {
        let view = self.view.as_mut().ok_or(ClientError::NoProject)?;
        let backup = view
            .move_local(task_id, status, index)
            .ok_or_else(|| ClientError::UnknownTask(task_id.to_string()))?;
        // A second drag before the first settles keeps the oldest backup.
        self.pending.entry(task_id.to_string()).or_insert(backup);
        Ok(())
    }

    /// Replace the optimistic guess with the server's order.
    pub fn confirm_move(&mut self, moved: &TaskMoved) {
        self.pending.remove(&moved.task_id);
        if let Some(view) = self.view.as_mut() {
            view.apply_moved(moved);
        }
    }

    pub fn rollback_move(&mut self, task_id: &str) -> bool {
        let Some(backup) = self.pending.remove(task_id) else {
            return false;
        };
        if let Some(view) = self.view.as_mut() {
            view.restore(backup);
        }
        tracing::info!(%task_id, "rolled back optimistic move");
        true
    }

    /// Drag-and-drop entry point: move locally, ask the server, then settle
    /// on its answer or undo. A failed request also leaves an error tagged
    /// `task:move` for [`take_error`](Self::take_error).
    pub async fn move_task_optimistic(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        index: usize,
    ) -> ClientResult<TaskMoved> {
        self.begin_move(task_id, status, index)?;
        let result = self
            .hydrator
            .move_task(task_id, status, index, self.connection_id.as_deref())
            .await;
        match result {
            Ok(moved) => {
                self.confirm_move(&moved);
                Ok(moved)
            }
            Err(e) => {
                self.rollback_move(task_id);
                self.last_error = Some(ErrorPayload {
                    message: e.to_string(),
                    event: Some(event::TASK_MOVE.to_string()),
                });
                Err(e)
            }
        }
    }
}

fn ref_payload(project_id: &str) -> Value {
    serde_json::to_value(ProjectRef {
        project_id: project_id.to_string(),
    })
    .unwrap_or(Value::Null)
}

fn payload<T: DeserializeOwned>(t: &str, d: Value) -> Option<T> {
    match serde_json::from_value(d) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(event = %t, error = %e, "dropping malformed event");
            None
        }
    }
}
