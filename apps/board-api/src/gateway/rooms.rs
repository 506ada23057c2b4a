//! Room Registry: which connections belong to which rooms.
//!
//! Each room sits behind its own `parking_lot::Mutex`, so join, leave and
//! broadcast are serialized per room while unrelated rooms proceed in
//! parallel. Delivery is a non-blocking push into each connection's
//! outbound queue; no room lock is ever held across an `.await`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::Identity;

pub type ConnectionId = String;

/// A named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomKey {
    /// Private room of one identity.
    User(String),
    /// Workspace-wide room of one project.
    Project(String),
    /// Per-task room for comment streams.
    Task(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::User(id) => write!(f, "user:{id}"),
            RoomKey::Project(id) => write!(f, "project:{id}"),
            RoomKey::Task(id) => write!(f, "task:{id}"),
        }
    }
}

impl FromStr for RoomKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or_else(|| format!("bad room key `{s}`"))?;
        if id.is_empty() {
            return Err(format!("bad room key `{s}`"));
        }
        match kind {
            "user" => Ok(RoomKey::User(id.to_string())),
            "project" => Ok(RoomKey::Project(id.to_string())),
            "task" => Ok(RoomKey::Task(id.to_string())),
            _ => Err(format!("bad room key `{s}`")),
        }
    }
}

/// Event envelope: typed, room-targeted, stamped by the server.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: String,
    pub room: Option<RoomKey>,
    pub data: Value,
    pub origin: Option<ConnectionId>,
    pub server_ts: DateTime<Utc>,
}

impl Envelope {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            room: None,
            data,
            origin: None,
            server_ts: Utc::now(),
        }
    }

    pub fn to_room(mut self, room: RoomKey) -> Self {
        self.room = Some(room);
        self
    }

    pub fn from_origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.map(str::to_string);
        self
    }
}

/// The registry's view of a live connection: its identity and the sending
/// half of its outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Arc<Identity>,
    sender: mpsc::Sender<Arc<Envelope>>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, identity: Identity, sender: mpsc::Sender<Arc<Envelope>>) -> Self {
        Self {
            id,
            identity: Arc::new(identity),
            sender,
        }
    }

    /// Queue an envelope for this connection. Fire-and-forget: a full or
    /// closed queue drops the envelope.
    pub fn deliver(&self, envelope: Arc<Envelope>) -> bool {
        match self.sender.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    event = %envelope.event,
                    "outbound queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Default)]
struct Room {
    members: BTreeMap<ConnectionId, ConnectionHandle>,
    // Set when the room was emptied and unlinked from the registry; a
    // joiner holding a stale Arc must fetch a fresh room.
    closed: bool,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomKey, Arc<Mutex<Room>>>,
    memberships: DashMap<ConnectionId, HashSet<RoomKey>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, key: &RoomKey) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Add a connection to a room. Idempotent; returns false if the
    /// connection was already a member.
    pub fn join(&self, handle: &ConnectionHandle, key: &RoomKey) -> bool {
        loop {
            let room = Arc::clone(
                self.rooms
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Room::default())))
                    .value(),
            );

            let mut guard = room.lock();
            if guard.closed {
                continue;
            }
            let added = guard
                .members
                .insert(handle.id.clone(), handle.clone())
                .is_none();
            drop(guard);

            self.memberships
                .entry(handle.id.clone())
                .or_default()
                .insert(key.clone());

            if added {
                tracing::debug!(connection_id = %handle.id, room = %key, "joined room");
            }
            return added;
        }
    }

    /// Remove a connection from a room. Idempotent; returns false if the
    /// connection was not a member.
    pub fn leave(&self, connection_id: &str, key: &RoomKey) -> bool {
        if let Some(mut rooms) = self.memberships.get_mut(connection_id) {
            rooms.remove(key);
        }
        self.remove_member(connection_id, key)
    }

    fn remove_member(&self, connection_id: &str, key: &RoomKey) -> bool {
        let Some(room) = self.room(key) else {
            return false;
        };

        let mut guard = room.lock();
        let removed = guard.members.remove(connection_id).is_some();
        if guard.members.is_empty() && !guard.closed {
            guard.closed = true;
            drop(guard);
            self.rooms.remove_if(key, |_, current| Arc::ptr_eq(current, &room));
        }

        if removed {
            tracing::debug!(connection_id, room = %key, "left room");
        }
        removed
    }

    /// Remove a connection from every room it belongs to. Returns the rooms
    /// it was in, sorted.
    pub fn leave_all(&self, connection_id: &str) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self
            .memberships
            .remove(connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        rooms.sort();

        for key in &rooms {
            self.remove_member(connection_id, key);
        }
        rooms
    }

    /// Deliver an envelope to everyone currently in the room, optionally
    /// skipping one connection. Returns how many queues accepted it.
    pub fn broadcast(&self, key: &RoomKey, envelope: Arc<Envelope>, exclude: Option<&str>) -> usize {
        let Some(room) = self.room(key) else {
            return 0;
        };

        let guard = room.lock();
        guard
            .members
            .values()
            .filter(|handle| Some(handle.id.as_str()) != exclude)
            .filter(|handle| handle.deliver(Arc::clone(&envelope)))
            .count()
    }

    /// Distinct identities currently connected to the room.
    pub fn members_of(&self, key: &RoomKey) -> Vec<Identity> {
        let Some(room) = self.room(key) else {
            return Vec::new();
        };

        let guard = room.lock();
        let mut seen = HashSet::new();
        guard
            .members
            .values()
            .filter(|handle| seen.insert(handle.identity.user_id.clone()))
            .map(|handle| handle.identity.as_ref().clone())
            .collect()
    }

    /// Number of live connections `user_id` holds in the room.
    pub fn user_connections_in(&self, key: &RoomKey, user_id: &str) -> usize {
        self.room(key)
            .map(|room| {
                room.lock()
                    .members
                    .values()
                    .filter(|handle| handle.identity.user_id == user_id)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_member(&self, connection_id: &str, key: &RoomKey) -> bool {
        self.memberships
            .get(connection_id)
            .is_some_and(|rooms| rooms.contains(key))
    }

    pub fn rooms_of(&self, connection_id: &str) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self
            .memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
