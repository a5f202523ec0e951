//! Chat Coordinator
//!
//! Message ingress and fan-out, reaction toggles, and typing indicators.
//! The server stamps ids and timestamps; clients never pick either.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;

use crate::api::AppState;
use crate::error::RoomError;
use crate::events::{ReplyToInput, ServerEvent};
use crate::gateway::{self, ConnId};
use crate::store::models::{ChatMessage, ReplyPreview, Room};
use crate::util::truncate_chars;

/// Reply previews keep at most this many characters of the quoted text.
pub const REPLY_PREVIEW_LEN: usize = 150;

async fn member_room(state: &AppState, user_id: &str, room_id: &str) -> Result<Room, RoomError> {
    let room = state
        .rooms
        .get(room_id)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    if room.user(user_id).is_none() {
        return Err(RoomError::NotAuthenticated);
    }
    Ok(room)
}

/// Ingest a message: trim, stamp with server time and a monotone id,
/// persist, and fan out to the whole room including the sender.
pub async fn handle_send(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    message: &str,
    reply_to: Option<&ReplyToInput>,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;
    let room = member_room(state, &user_id, room_id).await?;
    let user_name = room
        .user(&user_id)
        .map(|u| u.name.clone())
        .unwrap_or_default();

    let seq = state.chat.next_id(room_id).await?;
    let msg = ChatMessage {
        id: seq.to_string(),
        user_id,
        user_name,
        message: message.trim().to_string(),
        timestamp: Utc::now(),
        room_id: room_id.to_string(),
        reactions: BTreeMap::new(),
        reply_to: reply_to.map(|reply| ReplyPreview {
            message_id: reply.message_id.clone(),
            user_id: reply.user_id.clone(),
            user_name: reply.user_name.clone(),
            message: truncate_chars(&reply.message, REPLY_PREVIEW_LEN),
        }),
    };

    state.chat.append(room_id, &msg).await?;
    gateway::emit_to_room(state, &room, &ServerEvent::NewMessage { message: msg }).await;
    Ok(())
}

/// Toggle the caller's reaction on a message. The rewrite is serialized
/// per (room, message) by an advisory lock, released before fan-out.
pub async fn handle_toggle_reaction(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    message_id: &str,
    emoji: &str,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;
    let room = member_room(state, &user_id, room_id).await?;

    let updated = {
        let _guard = state
            .reaction_locks
            .acquire(&format!("{room_id}:{message_id}"))
            .await;
        state
            .chat
            .update_message(room_id, message_id, |msg| {
                msg.toggle_reaction(emoji, &user_id)
            })
            .await?
    };

    let Some((msg, action)) = updated else {
        // Trimmed out of the history or never existed
        return Err(RoomError::ValidationFailed("Unknown message".into()));
    };

    info!(room_id, message_id, emoji, ?action, "Reaction toggled");

    gateway::emit_to_room(
        state,
        &room,
        &ServerEvent::ReactionUpdated {
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
            user_id,
            reactions: msg.reactions,
            action,
        },
    )
    .await;
    Ok(())
}

/// Typing indicators: pure fan-out, nothing persisted. Clients expire
/// indicators after a second of silence.
pub async fn handle_typing(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    started: bool,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;
    let room = member_room(state, &user_id, room_id).await?;

    let event = if started {
        let user_name = room
            .user(&user_id)
            .map(|u| u.name.clone())
            .unwrap_or_default();
        ServerEvent::UserTyping { user_id: user_id.clone(), user_name }
    } else {
        ServerEvent::UserStoppedTyping { user_id: user_id.clone() }
    };

    gateway::emit_to_room_except(state, &room, &user_id, &event).await;
    Ok(())
}
