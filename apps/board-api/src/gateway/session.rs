//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use teamboard_common::protocol::{event, ServerFrame};

use crate::auth::Identity;

use super::error::GatewayError;
use super::oracle::MembershipCache;
use super::rooms::{ConnectionHandle, Envelope};

/// State for a single WebSocket connection.
pub struct ConnectionSession {
    pub handle: ConnectionHandle,
    /// Membership facts checked on behalf of this connection.
    pub memberships: MembershipCache,
    /// Monotonically increasing sequence number for outbound frames.
    seq: AtomicU64,
}

impl ConnectionSession {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            memberships: MembershipCache::default(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.handle.id
    }

    pub fn identity(&self) -> &Identity {
        &self.handle.identity
    }

    /// Get the next sequence number for an outbound frame.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Stamp an envelope into the wire frame for this connection.
    pub fn frame(&self, envelope: &Envelope) -> ServerFrame {
        ServerFrame {
            t: envelope.event.clone(),
            s: self.next_seq(),
            ts: envelope.server_ts,
            d: envelope.data.clone(),
        }
    }

    /// Queue an event for this connection only.
    pub fn reply<T: Serialize>(&self, event: &str, data: &T) -> bool {
        match serde_json::to_value(data) {
            Ok(data) => self.handle.deliver(Arc::new(Envelope::new(event, data))),
            Err(e) => {
                tracing::error!(?e, event, "failed to encode reply");
                false
            }
        }
    }

    /// Report a failed client event back to this connection.
    pub fn fail(&self, error: &GatewayError, failed_event: Option<&str>) {
        self.reply(event::ERROR, &error.payload(failed_event));
    }

    /// Frame for replies produced outside an envelope, e.g. `session:ready`.
    pub fn direct_frame(&self, event: &str, data: serde_json::Value) -> ServerFrame {
        ServerFrame {
            t: event.to_string(),
            s: self.next_seq(),
            ts: Utc::now(),
            d: data,
        }
    }
}
