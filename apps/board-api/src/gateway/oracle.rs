//! Membership Oracle: may this identity act in this room right now?
//!
//! Answers always come from the data layer's membership relation, never from
//! runtime room state. Each connection keeps a [`MembershipCache`] whose
//! entries expire after the configured window, so a role change or removal
//! takes effect within that window even for rooms already joined.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use teamboard_common::model::ProjectRole;

use crate::db::store::{DataStore, StoreResult};

use super::error::GatewayError;
use super::rooms::RoomKey;

/// A confirmed membership: the project the room belongs to and the caller's
/// role in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub project_id: String,
    pub role: ProjectRole,
}

impl Grant {
    /// Narrow to write access; viewers are refused.
    pub fn writable(self) -> Result<Self, GatewayError> {
        if self.role.can_write() {
            Ok(self)
        } else {
            Err(GatewayError::AccessDenied)
        }
    }
}

#[derive(Debug, Clone)]
struct CachedFact {
    grant: Option<Grant>,
    checked_at: Instant,
}

/// Per-connection cache of membership facts, positive and negative.
#[derive(Debug, Default)]
pub struct MembershipCache {
    facts: Mutex<HashMap<RoomKey, CachedFact>>,
}

impl MembershipCache {
    fn lookup(&self, room: &RoomKey, ttl: Duration) -> Option<Option<Grant>> {
        let facts = self.facts.lock();
        facts
            .get(room)
            .filter(|fact| fact.checked_at.elapsed() < ttl)
            .map(|fact| fact.grant.clone())
    }

    fn remember(&self, room: RoomKey, grant: Option<Grant>) {
        self.facts.lock().insert(
            room,
            CachedFact {
                grant,
                checked_at: Instant::now(),
            },
        );
    }

    pub fn forget(&self, room: &RoomKey) {
        self.facts.lock().remove(room);
    }
}

#[derive(Clone)]
pub struct MembershipOracle {
    store: Arc<dyn DataStore>,
    ttl: Duration,
}

impl MembershipOracle {
    pub fn new(store: Arc<dyn DataStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Uncached lookup. Task rooms resolve through the task's project; user
    /// rooms are never grantable on request.
    pub async fn resolve(&self, user_id: &str, room: &RoomKey) -> StoreResult<Option<Grant>> {
        let project_id = match room {
            RoomKey::User(_) => return Ok(None),
            RoomKey::Project(project_id) => project_id.clone(),
            RoomKey::Task(task_id) => match self.store.get_task(task_id).await? {
                Some(task) => task.project_id,
                None => return Ok(None),
            },
        };

        let membership = self.store.get_membership(&project_id, user_id).await?;
        Ok(membership.map(|m| Grant {
            project_id,
            role: m.role,
        }))
    }

    /// Authorize `user_id` for `room`, consulting `cache` first when given.
    /// A missing room and a missing membership are indistinguishable.
    pub async fn authorize(
        &self,
        user_id: &str,
        room: &RoomKey,
        cache: Option<&MembershipCache>,
    ) -> Result<Grant, GatewayError> {
        let cached = cache.and_then(|c| c.lookup(room, self.ttl));
        let grant = match cached {
            Some(grant) => grant,
            None => {
                let fresh = self.resolve(user_id, room).await.map_err(|e| {
                    tracing::error!(?e, user_id, room = %room, "membership lookup failed");
                    GatewayError::Persistence("Failed to verify access")
                })?;
                if let Some(cache) = cache {
                    cache.remember(room.clone(), fresh.clone());
                }
                fresh
            }
        };

        grant.ok_or_else(|| {
            tracing::debug!(user_id, room = %room, "membership denied");
            GatewayError::AccessDenied
        })
    }
}

#[cfg(test)]
mod tests {
    use teamboard_common::model::TaskStatus;

    use super::*;
    use crate::db::MemoryStore;

    fn setup(ttl: Duration) -> (Arc<MemoryStore>, MembershipOracle) {
        let store = Arc::new(MemoryStore::new());
        store.insert_user("u_owner", "Owner");
        store.insert_user("u_view", "Viewer");
        store.insert_user("u_out", "Outsider");
        store.insert_project("p1", "Roadmap", "u_owner");
        store.set_member("p1", "u_view", ProjectRole::Viewer);
        let oracle = MembershipOracle::new(store.clone(), ttl);
        (store, oracle)
    }

    #[tokio::test]
    async fn members_are_granted_with_their_role() {
        let (_store, oracle) = setup(Duration::from_secs(5));
        let grant = oracle
            .authorize("u_view", &RoomKey::Project("p1".into()), None)
            .await
            .unwrap();
        assert_eq!(grant.project_id, "p1");
        assert_eq!(grant.role, ProjectRole::Viewer);
        assert_eq!(grant.writable(), Err(GatewayError::AccessDenied));
    }

    #[tokio::test]
    async fn non_members_and_missing_projects_look_the_same() {
        let (_store, oracle) = setup(Duration::from_secs(5));
        let outsider = oracle
            .authorize("u_out", &RoomKey::Project("p1".into()), None)
            .await;
        let missing = oracle
            .authorize("u_owner", &RoomKey::Project("nope".into()), None)
            .await;
        assert_eq!(outsider, Err(GatewayError::AccessDenied));
        assert_eq!(missing, Err(GatewayError::AccessDenied));
    }

    #[tokio::test]
    async fn task_rooms_resolve_through_the_project() {
        let (store, oracle) = setup(Duration::from_secs(5));
        let task = store.seed_task("p1", "Write docs", TaskStatus::Todo);

        let grant = oracle
            .authorize("u_owner", &RoomKey::Task(task.id.clone()), None)
            .await
            .unwrap();
        assert_eq!(grant.project_id, "p1");

        let denied = oracle
            .authorize("u_out", &RoomKey::Task(task.id), None)
            .await;
        assert_eq!(denied, Err(GatewayError::AccessDenied));

        let missing = oracle
            .authorize("u_owner", &RoomKey::Task("tsk_missing".into()), None)
            .await;
        assert_eq!(missing, Err(GatewayError::AccessDenied));
    }

    #[tokio::test]
    async fn user_rooms_are_never_granted_on_request() {
        let (_store, oracle) = setup(Duration::from_secs(5));
        let result = oracle
            .authorize("u_owner", &RoomKey::User("u_owner".into()), None)
            .await;
        assert_eq!(result, Err(GatewayError::AccessDenied));
    }

    #[tokio::test]
    async fn cached_facts_expire_after_the_window() {
        let (store, oracle) = setup(Duration::from_millis(50));
        let cache = MembershipCache::default();
        let room = RoomKey::Project("p1".into());

        assert!(oracle.authorize("u_view", &room, Some(&cache)).await.is_ok());
        store.remove_member("p1", "u_view");

        // Still inside the window.
        assert!(oracle.authorize("u_view", &room, Some(&cache)).await.is_ok());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            oracle.authorize("u_view", &room, Some(&cache)).await,
            Err(GatewayError::AccessDenied)
        );
    }

    #[tokio::test]
    async fn zero_ttl_checks_every_time() {
        let (store, oracle) = setup(Duration::ZERO);
        let cache = MembershipCache::default();
        let room = RoomKey::Project("p1".into());

        assert!(oracle.authorize("u_view", &room, Some(&cache)).await.is_ok());
        store.set_member("p1", "u_view", ProjectRole::Member);
        let grant = oracle.authorize("u_view", &room, Some(&cache)).await.unwrap();
        assert_eq!(grant.role, ProjectRole::Member);
    }

    #[tokio::test]
    async fn store_outage_is_a_persistence_error() {
        let (store, oracle) = setup(Duration::from_secs(5));
        store.set_unavailable(true);
        let result = oracle
            .authorize("u_owner", &RoomKey::Project("p1".into()), None)
            .await;
        assert!(matches!(result, Err(GatewayError::Persistence(_))));
    }
}
