//! Room lifecycle integration tests.
//!
//! Drives the public dispatch surface end-to-end over the in-process
//! store: no Redis, no sockets, no network.
//!
//! Run with: `cargo test --test room_lifecycle_test`

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use wp_server::api::{create_router, AppState};
use wp_server::error::ErrorCode;
use wp_server::events::ServerEvent;
use wp_server::gateway::{dispatch, ConnId, Outbound};

/// A connection double: registered queue plus its id.
struct Client {
    conn_id: ConnId,
    rx: mpsc::Receiver<Outbound>,
}

impl Client {
    fn connect(state: &AppState) -> Self {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        state.registry.register(conn_id, tx);
        Self { conn_id, rx }
    }

    async fn send(&self, state: &AppState, payload: serde_json::Value) {
        dispatch::handle_event(state, self.conn_id, &payload.to_string()).await;
    }

    async fn recv(&mut self) -> ServerEvent {
        match tokio::time::timeout(Duration::from_secs(1), self.rx.recv()).await {
            Ok(Some(Outbound::Event(event))) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

#[tokio::test]
async fn test_full_watch_party_session() {
    let state = AppState::for_test();

    // Host opens the room
    let mut alice = Client::connect(&state);
    alice
        .send(&state, json!({"type": "create-room", "hostName": "Alice"}))
        .await;
    let ServerEvent::RoomCreated { room_id, .. } = alice.recv().await else {
        panic!("expected room-created");
    };

    // Guest joins and immediately sees the room snapshot
    let mut bob = Client::connect(&state);
    bob.send(
        &state,
        json!({"type": "join-room", "roomId": room_id, "userName": "Bob"}),
    )
    .await;
    let ServerEvent::RoomJoined { room, .. } = bob.recv().await else {
        panic!("expected room-joined");
    };
    assert_eq!(room.users.len(), 2);
    alice.drain();

    // Host picks a video and starts playback
    alice
        .send(
            &state,
            json!({"type": "set-video", "roomId": room_id, "videoUrl": "https://youtu.be/abc123"}),
        )
        .await;
    assert!(matches!(alice.recv().await, ServerEvent::VideoSet { .. }));
    assert!(matches!(bob.recv().await, ServerEvent::VideoSet { .. }));

    alice
        .send(
            &state,
            json!({"type": "play-video", "roomId": room_id, "currentTime": 0.0}),
        )
        .await;
    assert!(matches!(bob.recv().await, ServerEvent::VideoPlayed { .. }));

    // Chat flows to everyone
    bob.send(
        &state,
        json!({"type": "send-message", "roomId": room_id, "message": "great pick"}),
    )
    .await;
    assert!(matches!(alice.recv().await, ServerEvent::NewMessage { .. }));
    assert!(matches!(bob.recv().await, ServerEvent::NewMessage { .. }));

    // Host disconnects: the party is over
    wp_server::gateway::handle_disconnect(&state, alice.conn_id).await;
    let ServerEvent::RoomError { code, .. } = bob.recv().await else {
        panic!("expected room-error");
    };
    assert_eq!(code, ErrorCode::HostLeft);
    assert!(state.rooms.get(&room_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_guest_leave_then_rejoin_as_new_user() {
    let state = AppState::for_test();

    let mut alice = Client::connect(&state);
    alice
        .send(&state, json!({"type": "create-room", "hostName": "Alice"}))
        .await;
    let ServerEvent::RoomCreated { room_id, .. } = alice.recv().await else {
        panic!("expected room-created");
    };

    let mut bob = Client::connect(&state);
    bob.send(
        &state,
        json!({"type": "join-room", "roomId": room_id, "userName": "Bob"}),
    )
    .await;
    let ServerEvent::RoomJoined { user, .. } = bob.recv().await else {
        panic!("expected room-joined");
    };
    let first_id = user.id;

    // Clean leave destroys the identity
    bob.send(&state, json!({"type": "leave-room", "roomId": room_id}))
        .await;
    alice.drain();

    // The same connection can join again; a clean leave means a new user
    bob.send(
        &state,
        json!({"type": "join-room", "roomId": room_id, "userName": "Bob"}),
    )
    .await;
    let ServerEvent::RoomJoined { user, .. } = bob.recv().await else {
        panic!("expected room-joined");
    };
    assert_ne!(user.id, first_id);
}

#[tokio::test]
async fn test_health_endpoint_reports_ok() {
    let app = create_router(AppState::for_test());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}
