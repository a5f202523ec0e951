//! WebSocket Gateway
//!
//! One persistent bidirectional connection per client. Each connection gets
//! a sequential event loop (inbound events process in arrival order) and a
//! dedicated sender task draining an outbound queue, so per-recipient
//! ordering holds across all fan-out.

pub mod dispatch;
pub mod registry;


use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::RoomError;
use crate::events::ServerEvent;
use crate::store::models::Room;
use crate::{rooms, signaling};

pub use registry::{ConnId, Outbound, Registry};

/// Outbound queue depth per connection. A client this far behind is not
/// keeping up; sends block briefly and the socket closes if it stays stuck.
const OUTBOUND_QUEUE: usize = 100;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection: register it, pump outbound frames, process inbound
/// events in order, ping when idle, and clean up on the way out.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    state.registry.register(conn_id, tx);

    info!(conn_id = %conn_id, "WebSocket connected");

    // Forward queued frames to the socket
    let sender_handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                Outbound::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => ws_sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize event: {}", e);
                        continue;
                    }
                },
                Outbound::Ping => ws_sender.send(Message::Ping(Vec::new().into())).await,
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let mut last_activity = Instant::now();
    let mut missed_pings = 0u32;
    let idle = state.config.ping_idle;
    let mut ping_timer = tokio::time::interval_at(tokio::time::Instant::now() + idle, idle);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        missed_pings = 0;
                        dispatch::handle_event(&state, conn_id, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                        missed_pings = 0;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Axum answers pings; note the liveness
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(conn_id = %conn_id, "WebSocket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if last_activity.elapsed() >= idle {
                    if missed_pings >= 2 {
                        info!(conn_id = %conn_id, "Closing unresponsive connection");
                        break;
                    }
                    missed_pings += 1;
                    if !state.registry.ping(conn_id).await {
                        break;
                    }
                }
            }
        }
    }

    handle_disconnect(&state, conn_id).await;
    sender_handle.abort();

    info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Tear down a connection's room presence. Safe to call for connections
/// that never identified, already left, or were superseded by a reconnect.
pub async fn handle_disconnect(state: &AppState, conn_id: ConnId) {
    let Some((user_id, room_id)) = state.registry.unregister(conn_id) else {
        return;
    };

    // A reconnect may have rebound the identity to a newer connection;
    // only the mapping's current owner runs cleanup.
    let owns_identity = state
        .sockets
        .get(&user_id)
        .await
        .ok()
        .flatten()
        .is_some_and(|conn| conn == conn_id.to_string());
    if !owns_identity {
        debug!(conn_id = %conn_id, %user_id, "Identity already rebound, skipping cleanup");
        return;
    }

    signaling::handle_disconnect(state, &user_id, &room_id).await;
    if let Err(e) = rooms::handle_departure(state, &user_id, &room_id).await {
        warn!(%room_id, %user_id, error = %e, "Disconnect cleanup failed");
    }
}

/// The identity a connection holds, checked against the room id the
/// payload names. Cross-room payloads are treated as unauthenticated.
pub fn bound_identity(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
) -> Result<(String, String), RoomError> {
    let (user_id, bound_room) = state
        .registry
        .identity(conn_id)
        .ok_or(RoomError::NotAuthenticated)?;
    if bound_room != room_id {
        return Err(RoomError::NotAuthenticated);
    }
    Ok((user_id, bound_room))
}

/// Queue an event for one user, via the identity map.
pub async fn emit_to_user(state: &AppState, user_id: &str, event: ServerEvent) -> bool {
    match state.sockets.get(user_id).await {
        Ok(Some(conn)) => state.registry.send_str(&conn, event).await,
        _ => false,
    }
}

/// Queue an event for a batch of users. Recipients without a live
/// connection are skipped.
pub async fn emit_to_users(state: &AppState, user_ids: &[String], event: &ServerEvent) {
    let conns = state.sockets.get_many(user_ids).await.unwrap_or_default();
    for conn in conns.into_iter().flatten() {
        state.registry.send_str(&conn, event.clone()).await;
    }
}

/// Queue an event for every member of a room.
pub async fn emit_to_room(state: &AppState, room: &Room, event: &ServerEvent) {
    let ids: Vec<String> = room.users.iter().map(|u| u.id.clone()).collect();
    emit_to_users(state, &ids, event).await;
}

/// Queue an event for every member except one (usually the caller, who
/// already applied the change locally).
pub async fn emit_to_room_except(
    state: &AppState,
    room: &Room,
    except_user_id: &str,
    event: &ServerEvent,
) {
    let ids: Vec<String> = room
        .users
        .iter()
        .filter(|u| u.id != except_user_id)
        .map(|u| u.id.clone())
        .collect();
    emit_to_users(state, &ids, event).await;
}
