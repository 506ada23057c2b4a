/// Board API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret for verifying bearer access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Upper bound on pooled PostgreSQL connections.
    pub db_max_connections: usize,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// How long a cached membership fact stays valid, in milliseconds.
    pub membership_cache_ttl_ms: u64,
    /// How often a connection re-asks the oracle about the project and task
    /// rooms it is in, in milliseconds. `0` turns the sweep off.
    pub membership_recheck_ms: u64,
    /// Heartbeat interval announced in `session:ready`, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Snowflake worker id.
    pub worker_id: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("JWT_SECRET"),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            db_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS", 20),
            port: parsed_var("PORT", 4010),
            membership_cache_ttl_ms: parsed_var("MEMBERSHIP_CACHE_TTL_MS", 5000),
            membership_recheck_ms: parsed_var("MEMBERSHIP_RECHECK_MS", 5000),
            heartbeat_interval_ms: parsed_var("HEARTBEAT_INTERVAL_MS", 30_000),
            worker_id: parsed_var("WORKER_ID", 0),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
