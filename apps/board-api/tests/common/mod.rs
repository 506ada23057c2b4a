#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use teamboard_common::model::ProjectRole;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use board_api::config::Config;
use board_api::db::MemoryStore;
use board_api::AppState;

pub const TEST_SECRET: &str = "board-api-test-secret";

pub const ALICE: &str = "usr_alice";
pub const BOB: &str = "usr_bob";
pub const VERA: &str = "usr_vera";
pub const MALLORY: &str = "usr_mallory";

pub const ALPHA: &str = "prj_alpha";
pub const BETA: &str = "prj_beta";

pub fn test_config() -> Config {
    Config {
        jwt_secret: TEST_SECRET.to_string(),
        database_url: None,
        db_max_connections: 1,
        port: 0,
        membership_cache_ttl_ms: 5_000,
        membership_recheck_ms: 5_000,
        heartbeat_interval_ms: 30_000,
        worker_id: 1,
    }
}

/// Seeded world shared by the REST and gateway tests:
/// alice owns alpha and beta, bob is a member of both, vera views alpha,
/// mallory belongs to nothing.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

pub fn fixture_with(config: Config) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(ALICE, "Alice");
    store.insert_user(BOB, "Bob");
    store.insert_user(VERA, "Vera");
    store.insert_user(MALLORY, "Mallory");
    store.insert_project(ALPHA, "Alpha", ALICE);
    store.insert_project(BETA, "Beta", ALICE);
    store.set_member(ALPHA, BOB, ProjectRole::Member);
    store.set_member(BETA, BOB, ProjectRole::Member);
    store.set_member(ALPHA, VERA, ProjectRole::Viewer);

    let state = AppState::new(store.clone(), config);
    Fixture { store, state }
}

pub fn fixture() -> Fixture {
    fixture_with(test_config())
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    name: &'a str,
    iat: i64,
    exp: i64,
}

fn mint(user_id: &str, iat: i64, exp: i64) -> String {
    let claims = Claims {
        sub: user_id,
        name: user_id,
        iat,
        exp,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

/// Mint a valid HS256 access token.
pub fn token(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    mint(user_id, now, now + 300)
}

pub fn expired_token(user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    mint(user_id, now - 600, now - 300)
}

/// Build the full application router wired to a fresh fixture.
pub fn test_app() -> (Router, Fixture) {
    let fixture = fixture();
    let app = board_api::routes::router().with_state(fixture.state.clone());
    (app, fixture)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_server(fixture: &Fixture) -> SocketAddr {
    let app = board_api::routes::router().with_state(fixture.state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    addr
}

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway client that has already received `session:ready`.
pub struct WsClient {
    pub stream: WsStream,
    pub connection_id: String,
    pub ready: Value,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr, user_id: &str) -> Self {
        let url = format!("ws://{addr}/gateway?token={}", token(user_id));
        let (mut stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");

        let ready = next_frame(&mut stream).await.expect("session:ready");
        assert_eq!(ready["t"], "session:ready");
        let connection_id = ready["d"]["connectionId"]
            .as_str()
            .expect("connectionId")
            .to_string();

        Self {
            stream,
            connection_id,
            ready,
        }
    }

    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = serde_json::json!({ "t": event, "d": data });
        self.stream
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("ws send");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("ws send");
    }

    /// Next frame, failing the test after five seconds.
    pub async fn recv(&mut self) -> Value {
        next_frame(&mut self.stream).await.expect("expected a frame")
    }

    /// Skip frames until one named `event` arrives.
    pub async fn recv_event(&mut self, event: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["t"] == event {
                return frame;
            }
        }
    }

    /// Join a project room and wait for the ack.
    pub async fn join_project(&mut self, project_id: &str) {
        self.send("project:join", serde_json::json!({ "projectId": project_id }))
            .await;
        let ack = self.recv_event("project:joined").await;
        assert_eq!(ack["d"]["projectId"], project_id);
    }

    /// Frames that arrive within `window`, or none.
    pub async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(Ok(msg))) = time::timeout(window, self.stream.next()).await {
            if let Ok(text) = msg.into_text() {
                if let Ok(value) = serde_json::from_str(&text) {
                    frames.push(value);
                }
            }
        }
        frames
    }

    /// Round-trip a heartbeat so every earlier frame has been processed.
    pub async fn sync(&mut self) {
        self.send("heartbeat", serde_json::json!({})).await;
        self.recv_event("heartbeat:ack").await;
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

async fn next_frame(stream: &mut WsStream) -> Option<Value> {
    loop {
        let msg = time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timeout waiting for frame")?
            .ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

pub fn events(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| f["t"].as_str().map(str::to_string))
        .collect()
}
