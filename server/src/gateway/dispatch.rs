//! Event Dispatcher
//!
//! The single choke point between the socket and the coordinators: parse,
//! validate, enforce the connection state machine, route, and translate
//! every failure into the caller's error event. Errors are never
//! broadcast; they go back to the offending connection only.

use tracing::{debug, error};

use crate::api::AppState;
use crate::chat;
use crate::error::RoomError;
use crate::events::{validate, ClientEvent, Family, ServerEvent};
use crate::playback::{self, Transport};
use crate::rooms;
use crate::signaling::{self, Modality, Relay};

use super::registry::ConnId;

/// Handle one raw inbound frame.
pub async fn handle_event(state: &AppState, conn_id: ConnId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(conn_id = %conn_id, error = %e, "Rejecting malformed event");
            let err = RoomError::ValidationFailed("Unrecognized or malformed event".into());
            state
                .registry
                .send(
                    conn_id,
                    ServerEvent::RoomError {
                        error: err.to_string(),
                        code: err.code(),
                    },
                )
                .await;
            return;
        }
    };

    let family = event.family();
    if let Err(err) = route(state, conn_id, event).await {
        if let RoomError::Internal(detail) = &err {
            error!(conn_id = %conn_id, %detail, "Internal error handling event");
        }
        state.registry.send(conn_id, error_event(family, &err)).await;
    }
}

/// Map an error to the event the caller expects for this family.
fn error_event(family: Family, err: &RoomError) -> ServerEvent {
    let error = err.to_string();
    let code = err.code();
    match family {
        Family::Voice => ServerEvent::VoiceError { error, code },
        Family::Videochat => ServerEvent::VideochatError { error, code },
        Family::Lobby | Family::Video | Family::Chat => ServerEvent::RoomError { error, code },
    }
}

async fn route(state: &AppState, conn_id: ConnId, event: ClientEvent) -> Result<(), RoomError> {
    validate::validate(&event)?;

    // Connection state machine: only create/join may run before the
    // connection is bound to a room.
    if !event.is_entry() && state.registry.identity(conn_id).is_none() {
        return Err(RoomError::NotAuthenticated);
    }

    match event {
        // Lobby
        ClientEvent::CreateRoom { host_name } => {
            rooms::handle_create(state, conn_id, &host_name).await
        }
        ClientEvent::JoinRoom {
            room_id,
            user_name,
            host_token,
        } => rooms::handle_join(state, conn_id, &room_id, &user_name, host_token.as_deref()).await,
        ClientEvent::LeaveRoom { room_id } => rooms::handle_leave(state, conn_id, &room_id).await,
        ClientEvent::KickUser { room_id, user_id } => {
            rooms::handle_kick(state, conn_id, &room_id, &user_id).await
        }
        ClientEvent::PromoteHost { room_id, user_id } => {
            rooms::handle_promote(state, conn_id, &room_id, &user_id).await
        }

        // Video
        ClientEvent::SetVideo { room_id, video_url } => {
            playback::handle_set_video(state, conn_id, &room_id, &video_url).await
        }
        ClientEvent::PlayVideo {
            room_id,
            current_time,
        } => playback::handle_transport(state, conn_id, &room_id, current_time, Transport::Play)
            .await,
        ClientEvent::PauseVideo {
            room_id,
            current_time,
        } => playback::handle_transport(state, conn_id, &room_id, current_time, Transport::Pause)
            .await,
        ClientEvent::SeekVideo {
            room_id,
            current_time,
        } => playback::handle_transport(state, conn_id, &room_id, current_time, Transport::Seek)
            .await,
        ClientEvent::SyncCheck {
            room_id,
            current_time,
            is_playing,
            timestamp,
        } => {
            playback::handle_sync_check(
                state,
                conn_id,
                &room_id,
                current_time,
                is_playing,
                timestamp,
            )
            .await
        }
        ClientEvent::VideoErrorReport {
            room_id,
            code,
            message,
            current_src,
            ..
        } => {
            playback::handle_error_report(
                state,
                conn_id,
                &room_id,
                code,
                message.as_deref(),
                &current_src,
            )
            .await
        }

        // Chat
        ClientEvent::SendMessage {
            room_id,
            message,
            reply_to,
        } => chat::handle_send(state, conn_id, &room_id, &message, reply_to.as_ref()).await,
        ClientEvent::ToggleReaction {
            room_id,
            message_id,
            emoji,
        } => chat::handle_toggle_reaction(state, conn_id, &room_id, &message_id, &emoji).await,
        ClientEvent::TypingStart { room_id } => {
            chat::handle_typing(state, conn_id, &room_id, true).await
        }
        ClientEvent::TypingStop { room_id } => {
            chat::handle_typing(state, conn_id, &room_id, false).await
        }

        // Voice mesh
        ClientEvent::VoiceJoin { room_id } => {
            signaling::handle_join(state, conn_id, &room_id, Modality::Voice).await
        }
        ClientEvent::VoiceLeave { room_id } => {
            signaling::handle_leave(state, conn_id, &room_id, Modality::Voice).await
        }
        ClientEvent::VoiceOffer {
            room_id,
            target_user_id,
            sdp,
        } => {
            signaling::handle_relay(
                state,
                conn_id,
                &room_id,
                Modality::Voice,
                &target_user_id,
                Relay::Offer(sdp),
            )
            .await
        }
        ClientEvent::VoiceAnswer {
            room_id,
            target_user_id,
            sdp,
        } => {
            signaling::handle_relay(
                state,
                conn_id,
                &room_id,
                Modality::Voice,
                &target_user_id,
                Relay::Answer(sdp),
            )
            .await
        }
        ClientEvent::VoiceIceCandidate {
            room_id,
            target_user_id,
            candidate,
        } => {
            signaling::handle_relay(
                state,
                conn_id,
                &room_id,
                Modality::Voice,
                &target_user_id,
                Relay::Ice(candidate),
            )
            .await
        }

        // Camera mesh
        ClientEvent::VideochatJoin { room_id } => {
            signaling::handle_join(state, conn_id, &room_id, Modality::Video).await
        }
        ClientEvent::VideochatLeave { room_id } => {
            signaling::handle_leave(state, conn_id, &room_id, Modality::Video).await
        }
        ClientEvent::VideochatOffer {
            room_id,
            target_user_id,
            sdp,
        } => {
            signaling::handle_relay(
                state,
                conn_id,
                &room_id,
                Modality::Video,
                &target_user_id,
                Relay::Offer(sdp),
            )
            .await
        }
        ClientEvent::VideochatAnswer {
            room_id,
            target_user_id,
            sdp,
        } => {
            signaling::handle_relay(
                state,
                conn_id,
                &room_id,
                Modality::Video,
                &target_user_id,
                Relay::Answer(sdp),
            )
            .await
        }
        ClientEvent::VideochatIceCandidate {
            room_id,
            target_user_id,
            candidate,
        } => {
            signaling::handle_relay(
                state,
                conn_id,
                &room_id,
                Modality::Video,
                &target_user_id,
                Relay::Ice(candidate),
            )
            .await
        }
    }
}
