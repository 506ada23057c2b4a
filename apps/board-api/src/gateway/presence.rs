//! In-memory per-user connection counting.
//!
//! Presence is per **user**, not per connection: a user goes offline only when
//! every one of their connections has closed.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use teamboard_common::model::PresenceRecord;
use tokio::sync::Mutex;

use crate::db::store::{DataStore, StoreResult};

/// Thread-safe, DashMap-backed live-connection counter.
#[derive(Default)]
pub struct PresenceTracker {
    inner: DashMap<String, usize>,
    /// Serializes durable presence writes per user.
    writes: DashMap<String, Arc<Mutex<()>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true if it is the user's first.
    pub fn connect(&self, user_id: &str) -> bool {
        let mut count = self.inner.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Unregister a connection. Returns true if it was the user's last.
    pub fn disconnect(&self, user_id: &str) -> bool {
        match self.inner.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = entry.get().saturating_sub(1);
                if *entry.get() == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.inner.get(user_id).map(|c| *c).unwrap_or(0)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connection_count(user_id) > 0
    }

    /// Write the user's current online state to the store. Writes for one user
    /// run one at a time and read the counter under that lock, so the last one
    /// to land always matches the live connection count.
    pub async fn record(&self, store: &dyn DataStore, user_id: &str) -> StoreResult<PresenceRecord> {
        let lock = Arc::clone(self.writes.entry(user_id.to_string()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            store.set_presence(user_id, self.is_online(user_id)).await
        };
        drop(lock);
        self.writes
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[test]
    fn first_connect_and_last_disconnect_are_reported() {
        let tracker = PresenceTracker::new();
        assert!(tracker.connect("u1"));
        assert!(!tracker.connect("u1"));
        assert_eq!(tracker.connection_count("u1"), 2);

        assert!(!tracker.disconnect("u1"));
        assert!(tracker.is_online("u1"));
        assert!(tracker.disconnect("u1"));
        assert!(!tracker.is_online("u1"));
    }

    #[test]
    fn disconnect_of_unknown_user_is_ignored() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.disconnect("ghost"));
        assert_eq!(tracker.connection_count("ghost"), 0);
    }

    #[tokio::test]
    async fn late_offline_write_does_not_override_a_reconnect() {
        let tracker = PresenceTracker::new();
        let store = MemoryStore::new();

        tracker.connect("u1");
        assert!(tracker.disconnect("u1"));
        // Reconnect lands before the closing connection's write goes out.
        assert!(tracker.connect("u1"));
        tracker.record(&store, "u1").await.unwrap();
        tracker.record(&store, "u1").await.unwrap();

        let stored = store.get_presence("u1").await.unwrap().unwrap();
        assert!(stored.online);
        assert!(tracker.writes.is_empty());
    }

    #[tokio::test]
    async fn concurrent_churn_settles_on_the_final_count() {
        let tracker = Arc::new(PresenceTracker::new());
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    if tracker.connect("u1") {
                        tracker.record(store.as_ref(), "u1").await.unwrap();
                    }
                    tokio::task::yield_now().await;
                    if tracker.disconnect("u1") {
                        tracker.record(store.as_ref(), "u1").await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(!tracker.is_online("u1"));
        assert!(!store.get_presence("u1").await.unwrap().unwrap().online);
        assert!(tracker.writes.is_empty());
    }

    #[test]
    fn users_are_counted_independently() {
        let tracker = PresenceTracker::new();
        tracker.connect("u1");
        tracker.connect("u2");
        assert!(tracker.disconnect("u1"));
        assert!(tracker.is_online("u2"));
    }
}
