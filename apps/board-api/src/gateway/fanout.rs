//! Room-targeted event emission, shared by socket handlers and REST routes.

use std::sync::Arc;

use serde::Serialize;

use super::rooms::{Envelope, RoomKey, RoomRegistry};

/// Cloneable emitter; store in AppState.
#[derive(Clone)]
pub struct Fanout {
    rooms: Arc<RoomRegistry>,
}

impl Fanout {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Broadcast `data` as `event` to `room`. When `skip` names a connection,
    /// that connection is left out (echo suppression). Returns the number of
    /// connections the envelope was queued for.
    pub fn emit<T: Serialize>(
        &self,
        room: RoomKey,
        event: &str,
        data: &T,
        skip: Option<&str>,
    ) -> usize {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(?e, event, room = %room, "failed to encode event payload");
                return 0;
            }
        };

        let envelope = Envelope::new(event, data)
            .to_room(room.clone())
            .from_origin(skip);
        let delivered = self.rooms.broadcast(&room, Arc::new(envelope), skip);
        tracing::trace!(event, room = %room, delivered, "event broadcast");
        delivered
    }

    pub fn to_project<T: Serialize>(
        &self,
        project_id: &str,
        event: &str,
        data: &T,
        skip: Option<&str>,
    ) -> usize {
        self.emit(RoomKey::Project(project_id.to_string()), event, data, skip)
    }

    pub fn to_task<T: Serialize>(
        &self,
        task_id: &str,
        event: &str,
        data: &T,
        skip: Option<&str>,
    ) -> usize {
        self.emit(RoomKey::Task(task_id.to_string()), event, data, skip)
    }

    pub fn to_user<T: Serialize>(&self, user_id: &str, event: &str, data: &T) -> usize {
        self.emit(RoomKey::User(user_id.to_string()), event, data, None)
    }
}
