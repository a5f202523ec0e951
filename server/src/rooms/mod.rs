//! Room Coordinator
//!
//! Authoritative membership: create/join/leave, host privileges, kicks,
//! promotion, and disconnect cleanup. All mutations for a room run under
//! its advisory lock; fan-out happens after the lock drops.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::RoomError;
use crate::events::ServerEvent;
use crate::gateway::{self, ConnId};
use crate::signaling;
use crate::store::models::{Room, RoomUser, VideoState, VideoType};
use crate::store::rooms::RemoveOutcome;
use crate::util::{generate_host_token, generate_room_code, now_ms};

/// How many room codes to try before giving up on the namespace.
const CODE_ATTEMPTS: usize = 10;

/// Create a room with the caller as sole (primary) host.
pub async fn handle_create(
    state: &AppState,
    conn_id: ConnId,
    host_name: &str,
) -> Result<(), RoomError> {
    if state.registry.identity(conn_id).is_some() {
        return Err(RoomError::ValidationFailed(
            "This connection already joined a room".into(),
        ));
    }

    let mut room_id = None;
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_room_code();
        if !state.rooms.exists(&code).await? {
            room_id = Some(code);
            break;
        }
    }
    let room_id =
        room_id.ok_or_else(|| RoomError::Internal("room code collisions exhausted".into()))?;

    let user_id = Uuid::new_v4().to_string();
    let host = RoomUser {
        id: user_id.clone(),
        name: host_name.to_string(),
        is_host: true,
        joined_at: Utc::now(),
    };
    let room = Room {
        id: room_id.clone(),
        host_id: user_id.clone(),
        host_name: host_name.to_string(),
        host_token: generate_host_token(),
        video_url: None,
        video_type: VideoType::None,
        video_meta: None,
        video_state: VideoState::reset(now_ms()),
        users: vec![host],
        created_at: Utc::now(),
    };

    state.rooms.create(&room).await?;
    state.sockets.set(&user_id, &conn_id.to_string()).await?;
    state.registry.bind(conn_id, &user_id, &room_id);

    info!(%room_id, %user_id, host_name, "Room created");

    state
        .registry
        .send(
            conn_id,
            ServerEvent::RoomCreated {
                room_id,
                host_token: room.host_token.clone(),
                room: room.snapshot(),
            },
        )
        .await;
    Ok(())
}

/// Join a room, either as a fresh guest, a reconnecting member, or the
/// creator presenting their host token.
pub async fn handle_join(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    user_name: &str,
    host_token: Option<&str>,
) -> Result<(), RoomError> {
    if state.registry.identity(conn_id).is_some() {
        return Err(RoomError::ValidationFailed(
            "This connection already joined a room".into(),
        ));
    }

    let guard = state.room_locks.acquire(room_id).await;
    let room = state
        .rooms
        .get(room_id)
        .await?
        .ok_or(RoomError::RoomNotFound)?;

    // Name matches an existing member: host identities always need the
    // token; a guest identity can only be resumed once its old connection
    // is gone, otherwise the name is simply taken.
    if let Some(existing) = room.user_by_name(user_name) {
        let existing = existing.clone();
        if existing.is_host && host_token != Some(room.host_token.as_str()) {
            return Err(RoomError::InvalidHostCredentials);
        }
        if !existing.is_host {
            let live = match state.sockets.get(&existing.id).await? {
                Some(conn) => state.registry.is_live(&conn),
                None => false,
            };
            if live {
                return Err(RoomError::NameTaken);
            }
        }

        state.sockets.set(&existing.id, &conn_id.to_string()).await?;
        state.registry.bind(conn_id, &existing.id, room_id);
        drop(guard);

        info!(room_id, user_id = %existing.id, "Member reconnected");

        let chat_history = state.chat.history(room_id).await.unwrap_or_default();
        state
            .registry
            .send(
                conn_id,
                ServerEvent::RoomJoined {
                    room: room.snapshot(),
                    user: existing,
                    chat_history,
                },
            )
            .await;
        return Ok(());
    }

    // A new name equal to the creator's is a claim on the creator identity.
    let claiming_creator = user_name == room.host_name;
    if claiming_creator && host_token != Some(room.host_token.as_str()) {
        return Err(RoomError::InvalidHostCredentials);
    }

    let user = RoomUser {
        id: Uuid::new_v4().to_string(),
        name: user_name.to_string(),
        is_host: claiming_creator,
        joined_at: Utc::now(),
    };
    let room = state
        .rooms
        .add_user(room_id, user.clone())
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    state.sockets.set(&user.id, &conn_id.to_string()).await?;
    state.registry.bind(conn_id, &user.id, room_id);
    drop(guard);

    info!(room_id, user_id = %user.id, user_name, "User joined");

    let chat_history = state.chat.history(room_id).await.unwrap_or_default();
    // room-joined reaches the caller before anyone hears user-joined
    state
        .registry
        .send(
            conn_id,
            ServerEvent::RoomJoined {
                room: room.snapshot(),
                user: user.clone(),
                chat_history,
            },
        )
        .await;
    let joined_user_id = user.id.clone();
    gateway::emit_to_room_except(
        state,
        &room,
        &joined_user_id,
        &ServerEvent::UserJoined { user },
    )
    .await;
    Ok(())
}

/// Explicit leave. The connection stays open and may join another room.
pub async fn handle_leave(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
) -> Result<(), RoomError> {
    let (user_id, bound_room) = gateway::bound_identity(state, conn_id, room_id)?;
    signaling::handle_disconnect(state, &user_id, &bound_room).await;
    handle_departure(state, &user_id, &bound_room).await?;
    state.registry.clear_binding(conn_id);
    Ok(())
}

/// Shared removal path for leaves, kicked targets, and disconnects.
///
/// The primary host leaving closes the room: guests are evicted with
/// `host-left`, identity mappings drop, signaling sets close. Anyone else
/// leaving is a plain removal; an emptied room is deleted.
pub async fn handle_departure(
    state: &AppState,
    user_id: &str,
    room_id: &str,
) -> Result<(), RoomError> {
    let guard = state.room_locks.acquire(room_id).await;
    let Some(room) = state.rooms.get(room_id).await? else {
        let _ = state.sockets.remove(user_id).await;
        return Ok(());
    };

    if room.host_id == user_id {
        state.rooms.delete(room_id).await?;
        drop(guard);
        close_room(state, &room).await;
        info!(room_id, "Room closed (host left)");
        return Ok(());
    }

    let outcome = state.rooms.remove_user(room_id, user_id).await?;
    drop(guard);
    let _ = state.sockets.remove(user_id).await;

    match outcome {
        RemoveOutcome::Removed { room, promoted } => {
            gateway::emit_to_room(
                state,
                &room,
                &ServerEvent::UserLeft {
                    user_id: user_id.to_string(),
                },
            )
            .await;
            if let Some(promoted) = promoted {
                gateway::emit_to_room(
                    state,
                    &room,
                    &ServerEvent::UserPromoted {
                        user_id: promoted.id,
                        user_name: promoted.name,
                    },
                )
                .await;
            }
        }
        RemoveOutcome::Deleted => {
            scrub_room_state(state, room_id).await;
            info!(room_id, "Room emptied");
        }
        RemoveOutcome::NotFound => {}
    }
    Ok(())
}

/// Evict everyone from a closed room and drop its caches.
async fn close_room(state: &AppState, room: &Room) {
    let guest_ids: Vec<String> = room
        .users
        .iter()
        .filter(|u| u.id != room.host_id)
        .map(|u| u.id.clone())
        .collect();

    let err = RoomError::HostLeft;
    let conns = state
        .sockets
        .get_many(&guest_ids)
        .await
        .unwrap_or_default();
    for conn in conns.into_iter().flatten() {
        state
            .registry
            .send_str(
                &conn,
                ServerEvent::RoomError {
                    error: err.to_string(),
                    code: err.code(),
                },
            )
            .await;
        if let Ok(id) = Uuid::parse_str(&conn) {
            state.registry.clear_binding(id);
        }
    }

    for user in &room.users {
        if let Err(e) = state.sockets.remove(&user.id).await {
            warn!(user_id = %user.id, error = %e, "Failed to drop identity mapping");
        }
    }
    scrub_room_state(state, &room.id).await;
}

async fn scrub_room_state(state: &AppState, room_id: &str) {
    state.signals.clear_room(room_id);
    state.playback_reports.clear(room_id);
    state.room_locks.discard(room_id);
    if let Err(e) = state.chat.clear(room_id).await {
        warn!(room_id, error = %e, "Failed to clear chat history");
    }
}

/// Grant host privileges. Host-only; the primary host does not change.
pub async fn handle_promote(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    target_user_id: &str,
) -> Result<(), RoomError> {
    let (caller_id, _) = gateway::bound_identity(state, conn_id, room_id)?;

    let guard = state.room_locks.acquire(room_id).await;
    let room = state
        .rooms
        .get(room_id)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    if !room.is_host(&caller_id) {
        return Err(RoomError::HostOnly);
    }
    let target = room
        .user(target_user_id)
        .ok_or(RoomError::TargetNotInRoom)?
        .clone();

    let room = state
        .rooms
        .set_host_flag(room_id, target_user_id, true)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    drop(guard);

    info!(room_id, user_id = %target.id, "User promoted to host");

    gateway::emit_to_room(
        state,
        &room,
        &ServerEvent::UserPromoted {
            user_id: target.id,
            user_name: target.name,
        },
    )
    .await;
    Ok(())
}

/// Kick a guest. Host-only; hosts cannot kick other hosts.
pub async fn handle_kick(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    target_user_id: &str,
) -> Result<(), RoomError> {
    let (caller_id, _) = gateway::bound_identity(state, conn_id, room_id)?;

    let guard = state.room_locks.acquire(room_id).await;
    let room = state
        .rooms
        .get(room_id)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    if !room.is_host(&caller_id) {
        return Err(RoomError::HostOnly);
    }
    let target = room
        .user(target_user_id)
        .ok_or(RoomError::TargetNotInRoom)?
        .clone();
    if target.is_host {
        return Err(RoomError::HostOnly);
    }
    let kicked_by = room.user(&caller_id).map(|u| u.name.clone());

    let outcome = state.rooms.remove_user(room_id, target_user_id).await?;
    drop(guard);

    info!(room_id, user_id = %target.id, "User kicked");

    // Announced to the whole room, target included, before the usual
    // membership event.
    gateway::emit_to_room(
        state,
        &room,
        &ServerEvent::UserKicked {
            user_id: target.id.clone(),
            user_name: target.name.clone(),
            kicked_by,
        },
    )
    .await;

    signaling::handle_disconnect(state, target_user_id, room_id).await;

    let target_conn = state.sockets.get(target_user_id).await?;
    let _ = state.sockets.remove(target_user_id).await;
    if let Some(conn) = target_conn {
        if let Ok(id) = Uuid::parse_str(&conn) {
            state.registry.clear_binding(id);
        }
        state.registry.close_str(&conn).await;
    }

    if let RemoveOutcome::Removed { room, .. } = outcome {
        gateway::emit_to_room(
            state,
            &room,
            &ServerEvent::UserLeft {
                user_id: target_user_id.to_string(),
            },
        )
        .await;
    }
    Ok(())
}
