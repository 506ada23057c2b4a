mod common;

use std::time::Duration;

use axum_test::TestServer;
use http::header::AUTHORIZATION;
use serde_json::json;
use teamboard_common::model::TaskStatus;
use tokio_tungstenite::tungstenite;

use common::{events, Fixture, WsClient, ALICE, ALPHA, BETA, BOB, MALLORY, VERA};

const QUIET: Duration = Duration::from_millis(200);

async fn assert_rejected(url: String) {
    match tokio_tungstenite::connect_async(&url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
        }
        Err(other) => panic!("unexpected handshake error: {other:?}"),
        Ok(_) => panic!("handshake should have been refused"),
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_without_valid_token_is_refused() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    assert_rejected(format!("ws://{addr}/gateway")).await;
    assert_rejected(format!("ws://{addr}/gateway?token=not-a-jwt")).await;
    assert_rejected(format!(
        "ws://{addr}/gateway?token={}",
        common::expired_token(ALICE)
    ))
    .await;
    // Signed correctly, but nobody by that id exists.
    assert_rejected(format!(
        "ws://{addr}/gateway?token={}",
        common::token("usr_ghost")
    ))
    .await;
}

#[tokio::test]
async fn handshake_accepts_bearer_header() {
    use tungstenite::client::IntoClientRequest;

    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut request = format!("ws://{addr}/gateway").into_client_request().unwrap();
    request.headers_mut().insert(
        AUTHORIZATION,
        format!("Bearer {}", common::token(BOB)).parse().unwrap(),
    );
    let (mut stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    use futures_util::StreamExt;
    let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let ready: serde_json::Value = serde_json::from_str(&msg.into_text().unwrap()).unwrap();
    assert_eq!(ready["t"], "session:ready");
    assert_eq!(ready["d"]["user"]["id"], BOB);
}

#[tokio::test]
async fn session_ready_is_the_first_frame() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut client = WsClient::connect(addr, ALICE).await;
    assert_eq!(client.ready["s"], 1);
    assert_eq!(client.ready["d"]["user"]["name"], "Alice");
    assert_eq!(client.ready["d"]["heartbeatInterval"], 30_000);
    assert!(client.connection_id.starts_with("conn_"));

    client.sync().await;

    let presence = fixture.store.presence_of(ALICE);
    assert!(presence.is_some_and(|p| p.online));
}

// ---------------------------------------------------------------------------
// Rooms and authorization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn members_can_join_and_others_get_a_generic_denial() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut bob = WsClient::connect(addr, BOB).await;
    bob.join_project(ALPHA).await;

    let mut mallory = WsClient::connect(addr, MALLORY).await;
    mallory
        .send("project:join", json!({ "projectId": ALPHA }))
        .await;
    let denied = mallory.recv_event("error").await;
    mallory
        .send("project:join", json!({ "projectId": "prj_does_not_exist" }))
        .await;
    let missing = mallory.recv_event("error").await;

    assert_eq!(denied["d"]["message"], "Access denied");
    assert_eq!(denied["d"], missing["d"]);
    assert_eq!(denied["d"]["event"], "project:join");
}

#[tokio::test]
async fn chat_reaches_the_room_and_nobody_else() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    let mut bob_elsewhere = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;
    bob_elsewhere.join_project(BETA).await;

    alice
        .send(
            "chat:message",
            json!({ "projectId": ALPHA, "content": "  ship it  ", "type": "text" }),
        )
        .await;

    let to_alice = alice.recv_event("chat:message").await;
    let to_bob = bob.recv_event("chat:message").await;
    assert_eq!(to_alice["d"], to_bob["d"]);
    assert_eq!(to_bob["d"]["content"], "ship it");
    assert_eq!(to_bob["d"]["authorId"], ALICE);
    assert!(to_bob["d"]["id"].is_string());
    assert_eq!(fixture.store.message_count(ALPHA), 1);

    let stray = bob_elsewhere.drain(QUIET).await;
    assert!(!events(&stray).contains(&"chat:message".to_string()));
}

#[tokio::test]
async fn typing_is_not_echoed_to_the_typist() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    alice
        .send("chat:typing", json!({ "projectId": ALPHA, "isTyping": true }))
        .await;
    let typing = bob.recv_event("chat:typing").await;
    assert_eq!(typing["d"]["userId"], ALICE);
    assert_eq!(typing["d"]["isTyping"], true);

    alice.sync().await;
    assert!(!events(&alice.drain(QUIET).await).contains(&"chat:typing".to_string()));
    assert_eq!(fixture.store.message_count(ALPHA), 0);
}

#[tokio::test]
async fn read_receipts_are_broadcast() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    alice
        .send("chat:message", json!({ "projectId": ALPHA, "content": "hi" }))
        .await;
    let message = bob.recv_event("chat:message").await;
    let message_id = message["d"]["id"].as_str().unwrap().to_string();

    bob.send("chat:read", json!({ "messageId": message_id })).await;
    let receipt = alice.recv_event("chat:read").await;
    assert_eq!(receipt["d"]["messageId"], message_id.as_str());
    assert_eq!(receipt["d"]["userId"], BOB);

    // Receipts for unknown messages look like any other denial.
    bob.send("chat:read", json!({ "messageId": "12345" })).await;
    let error = bob.recv_event("error").await;
    assert_eq!(error["d"]["message"], "Access denied");
}

#[tokio::test]
async fn malformed_events_only_bother_the_sender() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    alice.send_raw("{ not json").await;
    let invalid = alice.recv_event("error").await;
    assert_eq!(invalid["d"]["message"], "Invalid JSON");

    alice
        .send("chat:message", json!({ "projectId": ALPHA, "content": "   " }))
        .await;
    let blank = alice.recv_event("error").await;
    assert_eq!(blank["d"]["event"], "chat:message");

    alice.send("board:explode", json!({})).await;
    let unknown = alice.recv_event("error").await;
    assert!(unknown["d"]["message"]
        .as_str()
        .unwrap()
        .contains("board:explode"));

    // Still connected and serving.
    alice.sync().await;
    assert!(events(&bob.drain(QUIET).await).is_empty());
}

#[tokio::test]
async fn removed_member_loses_access_mid_session() {
    let mut config = common::test_config();
    config.membership_cache_ttl_ms = 0;
    let fixture = common::fixture_with(config);
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    fixture.store.remove_member(ALPHA, BOB);

    bob.send("chat:message", json!({ "projectId": ALPHA, "content": "still here?" }))
        .await;
    let denied = bob.recv_event("error").await;
    assert_eq!(denied["d"]["message"], "Access denied");
    assert_eq!(fixture.store.message_count(ALPHA), 0);

    // Denial evicted bob from the room.
    alice
        .send("chat:message", json!({ "projectId": ALPHA, "content": "bye bob" }))
        .await;
    alice.recv_event("chat:message").await;
    assert!(!events(&bob.drain(QUIET).await).contains(&"chat:message".to_string()));
}

#[tokio::test]
async fn silent_removed_member_stops_receiving_broadcasts() {
    let mut config = common::test_config();
    config.membership_cache_ttl_ms = 0;
    config.membership_recheck_ms = 50;
    let fixture = common::fixture_with(config);
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;
    bob.sync().await;

    // Bob never sends another event; the periodic recheck has to evict him.
    fixture.store.remove_member(ALPHA, BOB);
    tokio::time::sleep(Duration::from_millis(300)).await;

    for n in 0..3 {
        alice
            .send("chat:message", json!({ "projectId": ALPHA, "content": format!("after {n}") }))
            .await;
        alice.recv_event("chat:message").await;
    }
    assert_eq!(fixture.store.message_count(ALPHA), 3);
    assert!(!events(&bob.drain(QUIET).await).contains(&"chat:message".to_string()));
}

#[tokio::test]
async fn failed_persistence_broadcasts_nothing() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    fixture.store.set_unavailable(true);
    alice
        .send("chat:message", json!({ "projectId": ALPHA, "content": "lost?" }))
        .await;
    let error = alice.recv_event("error").await;
    fixture.store.set_unavailable(false);

    assert!(error["d"]["message"].is_string());
    assert!(!events(&bob.drain(QUIET).await).contains(&"chat:message".to_string()));
}

#[tokio::test]
async fn task_rooms_need_project_membership() {
    let fixture = common::fixture();
    let task = fixture.store.seed_task(ALPHA, "Design review", TaskStatus::Todo);
    let addr = common::start_server(&fixture).await;

    let mut vera = WsClient::connect(addr, VERA).await;
    vera.send("task:join", json!(task.id)).await;
    vera.sync().await;

    let mut mallory = WsClient::connect(addr, MALLORY).await;
    mallory.send("task:join", json!({ "taskId": task.id })).await;
    let denied = mallory.recv_event("error").await;
    assert_eq!(denied["d"]["message"], "Access denied");

    let server = TestServer::new(board_api::routes::router().with_state(fixture.state.clone())).unwrap();
    let resp = server
        .post(&format!("/api/v1/tasks/{}/comments", task.id))
        .add_header(AUTHORIZATION, format!("Bearer {}", common::token(ALICE)))
        .json(&json!({ "content": "Looks good" }))
        .await;
    resp.assert_status(http::StatusCode::CREATED);

    let comment = vera.recv_event("comment:added").await;
    assert_eq!(comment["d"]["content"], "Looks good");
    assert!(!events(&mallory.drain(QUIET).await).contains(&"comment:added".to_string()));
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn online_is_announced_to_every_member_project() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice_alpha = WsClient::connect(addr, ALICE).await;
    let mut alice_beta = WsClient::connect(addr, ALICE).await;
    alice_alpha.join_project(ALPHA).await;
    alice_beta.join_project(BETA).await;

    // Bob has joined no rooms yet; membership alone decides the fan-out.
    let mut bob = WsClient::connect(addr, BOB).await;
    bob.send("presence:online", json!({})).await;

    let in_alpha = alice_alpha.recv_event("presence:online").await;
    let in_beta = alice_beta.recv_event("presence:online").await;
    assert_eq!(in_alpha["d"]["userId"], BOB);
    assert_eq!(in_beta["d"]["userName"], "Bob");
}

#[tokio::test]
async fn presence_get_lists_connected_members() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    bob.send("presence:get", json!(ALPHA)).await;
    let list = bob.recv_event("presence:list").await;
    let mut online: Vec<String> = list["d"]["onlineUsers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["userId"].as_str().unwrap().to_string())
        .collect();
    online.sort();
    assert_eq!(list["d"]["projectId"], ALPHA);
    assert_eq!(online, vec![ALICE.to_string(), BOB.to_string()]);
}

#[tokio::test]
async fn disconnect_announces_offline_once_per_joined_project() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut watcher_alpha = WsClient::connect(addr, ALICE).await;
    let mut watcher_beta = WsClient::connect(addr, ALICE).await;
    watcher_alpha.join_project(ALPHA).await;
    watcher_beta.join_project(BETA).await;

    let mut bob = WsClient::connect(addr, BOB).await;
    bob.join_project(ALPHA).await;
    bob.join_project(BETA).await;
    bob.close().await;

    let alpha_frames = watcher_alpha.drain(Duration::from_millis(500)).await;
    let beta_frames = watcher_beta.drain(Duration::from_millis(500)).await;
    let offline = |frames: &[serde_json::Value]| {
        frames
            .iter()
            .filter(|f| f["t"] == "presence:offline" && f["d"]["userId"] == BOB)
            .count()
    };
    assert_eq!(offline(&alpha_frames), 1);
    assert_eq!(offline(&beta_frames), 1);

    let record = fixture.store.presence_of(BOB).unwrap();
    assert!(!record.online);
    let alpha = board_api::gateway::RoomKey::Project(ALPHA.to_string());
    assert!(fixture
        .state
        .rooms
        .members_of(&alpha)
        .iter()
        .all(|identity| identity.user_id != BOB));
}

#[tokio::test]
async fn second_tab_keeps_the_user_online() {
    let fixture = common::fixture();
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    alice.join_project(ALPHA).await;

    let mut bob_tab1 = WsClient::connect(addr, BOB).await;
    let mut bob_tab2 = WsClient::connect(addr, BOB).await;
    bob_tab1.join_project(ALPHA).await;
    bob_tab2.join_project(ALPHA).await;

    bob_tab1.close().await;
    let frames = alice.drain(Duration::from_millis(400)).await;
    assert!(!events(&frames).contains(&"presence:offline".to_string()));
    assert!(fixture.store.presence_of(BOB).unwrap().online);

    bob_tab2.close().await;
    let offline = alice.recv_event("presence:offline").await;
    assert_eq!(offline["d"]["userId"], BOB);
}

// ---------------------------------------------------------------------------
// REST mutations on the bus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rest_move_is_broadcast_without_echo() {
    let fixture: Fixture = common::fixture();
    let a = fixture.store.seed_task(ALPHA, "A", TaskStatus::InProgress);
    let b = fixture.store.seed_task(ALPHA, "B", TaskStatus::InProgress);
    let t = fixture.store.seed_task(ALPHA, "T", TaskStatus::Todo);
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    let server = TestServer::new(board_api::routes::router().with_state(fixture.state.clone())).unwrap();
    let resp = server
        .put(&format!("/api/v1/tasks/{}/move", t.id))
        .add_header(AUTHORIZATION, format!("Bearer {}", common::token(ALICE)))
        .add_header("x-connection-id", alice.connection_id.clone())
        .json(&json!({ "status": "IN_PROGRESS", "index": 0 }))
        .await;
    resp.assert_status_ok();

    let moved = bob.recv_event("task:moved").await;
    let order: Vec<&str> = moved["d"]["order"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["taskId"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec![t.id.as_str(), a.id.as_str(), b.id.as_str()]);
    assert_eq!(moved["d"]["fromStatus"], "TODO");
    assert_eq!(moved["d"]["status"], "IN_PROGRESS");

    assert!(!events(&alice.drain(QUIET).await).contains(&"task:moved".to_string()));
}

#[tokio::test]
async fn foreign_connection_id_does_not_suppress_delivery() {
    let fixture = common::fixture();
    let t = fixture.store.seed_task(ALPHA, "T", TaskStatus::Todo);
    let addr = common::start_server(&fixture).await;

    let mut alice = WsClient::connect(addr, ALICE).await;
    let mut bob = WsClient::connect(addr, BOB).await;
    alice.join_project(ALPHA).await;
    bob.join_project(ALPHA).await;

    // Alice names bob's socket as her own.
    let server = TestServer::new(board_api::routes::router().with_state(fixture.state.clone())).unwrap();
    let resp = server
        .put(&format!("/api/v1/tasks/{}/move", t.id))
        .add_header(AUTHORIZATION, format!("Bearer {}", common::token(ALICE)))
        .add_header("x-connection-id", bob.connection_id.clone())
        .json(&json!({ "status": "DONE", "index": 0 }))
        .await;
    resp.assert_status_ok();

    let moved = bob.recv_event("task:moved").await;
    assert_eq!(moved["d"]["taskId"], t.id.as_str());
    let echoed = alice.recv_event("task:moved").await;
    assert_eq!(echoed["d"]["status"], "DONE");
}

#[tokio::test]
async fn assignment_notifies_the_assignee_privately() {
    let fixture = common::fixture();
    let task = fixture.store.seed_task(ALPHA, "Triage", TaskStatus::Todo);
    let addr = common::start_server(&fixture).await;

    let mut bob = WsClient::connect(addr, BOB).await;
    bob.send("notification:join", serde_json::Value::Null).await;
    bob.sync().await;
    let mut vera = WsClient::connect(addr, VERA).await;
    vera.join_project(ALPHA).await;

    let server = TestServer::new(board_api::routes::router().with_state(fixture.state.clone())).unwrap();
    server
        .put(&format!("/api/v1/tasks/{}/assignee", task.id))
        .add_header(AUTHORIZATION, format!("Bearer {}", common::token(ALICE)))
        .json(&json!({ "assigneeId": BOB }))
        .await
        .assert_status_ok();

    let notification = bob.recv_event("notification:new").await;
    assert_eq!(notification["d"]["kind"], "task_assigned");
    assert_eq!(notification["d"]["taskId"], task.id.as_str());

    let assigned = vera.recv_event("task:assigned").await;
    assert_eq!(assigned["d"]["task"]["assigneeId"], BOB);
    assert!(!events(&vera.drain(QUIET).await).contains(&"notification:new".to_string()));
    assert_eq!(fixture.store.notifications_for(BOB).len(), 1);
}
