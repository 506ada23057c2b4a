pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod ordering;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use db::store::DataStore;
use gateway::{Fanout, MembershipOracle, PresenceTracker, RoomRegistry};
use ordering::OrderService;
use teamboard_common::SnowflakeGenerator;

/// Shared application state available to all route and gateway handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub config: Arc<Config>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub rooms: Arc<RoomRegistry>,
    pub fanout: Fanout,
    pub oracle: MembershipOracle,
    pub presence: Arc<PresenceTracker>,
    pub ordering: Arc<OrderService>,
}

impl AppState {
    /// Wire every collaborator around one injected data store.
    pub fn new(store: Arc<dyn DataStore>, config: Config) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let ttl = Duration::from_millis(config.membership_cache_ttl_ms);

        Self {
            snowflake: Arc::new(SnowflakeGenerator::new(config.worker_id)),
            fanout: Fanout::new(rooms.clone()),
            oracle: MembershipOracle::new(store.clone(), ttl),
            presence: Arc::new(PresenceTracker::new()),
            ordering: Arc::new(OrderService::new(store.clone())),
            rooms,
            store,
            config: Arc::new(config),
        }
    }
}
