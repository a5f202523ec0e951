//! Wire Protocol
//!
//! Every message on the event bus is one of these tagged shapes: a `type`
//! tag with a kebab-case event name and camelCase payload fields. Inbound
//! payloads are validated before dispatch; see [`validate`].

pub mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::resolve::VideoMeta;
use crate::store::models::{ChatMessage, ReactionAction, RoomSnapshot, RoomUser, VideoType};

/// Reply envelope a client attaches to a message. The server trims the
/// quoted text before storing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyToInput {
    pub message_id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
}

/// Client-to-server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    // Lobby
    CreateRoom {
        host_name: String,
    },
    JoinRoom {
        room_id: String,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_token: Option<String>,
    },
    LeaveRoom {
        room_id: String,
    },
    KickUser {
        room_id: String,
        user_id: String,
    },
    PromoteHost {
        room_id: String,
        user_id: String,
    },

    // Video
    SetVideo {
        room_id: String,
        video_url: String,
    },
    PlayVideo {
        room_id: String,
        current_time: f64,
    },
    PauseVideo {
        room_id: String,
        current_time: f64,
    },
    SeekVideo {
        room_id: String,
        current_time: f64,
    },
    SyncCheck {
        room_id: String,
        current_time: f64,
        is_playing: bool,
        timestamp: i64,
    },
    VideoErrorReport {
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        current_src: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_time: Option<f64>,
    },

    // Chat
    SendMessage {
        room_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyToInput>,
    },
    ToggleReaction {
        room_id: String,
        message_id: String,
        emoji: String,
    },
    TypingStart {
        room_id: String,
    },
    TypingStop {
        room_id: String,
    },

    // Voice mesh
    VoiceJoin {
        room_id: String,
    },
    VoiceLeave {
        room_id: String,
    },
    VoiceOffer {
        room_id: String,
        target_user_id: String,
        sdp: String,
    },
    VoiceAnswer {
        room_id: String,
        target_user_id: String,
        sdp: String,
    },
    VoiceIceCandidate {
        room_id: String,
        target_user_id: String,
        candidate: serde_json::Value,
    },

    // Camera mesh, identical shapes
    VideochatJoin {
        room_id: String,
    },
    VideochatLeave {
        room_id: String,
    },
    VideochatOffer {
        room_id: String,
        target_user_id: String,
        sdp: String,
    },
    VideochatAnswer {
        room_id: String,
        target_user_id: String,
        sdp: String,
    },
    VideochatIceCandidate {
        room_id: String,
        target_user_id: String,
        candidate: serde_json::Value,
    },
}

/// Which coordinator family an event belongs to. Decides where errors are
/// reported (`room-error` vs the modality-specific `*-error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Lobby,
    Video,
    Chat,
    Voice,
    Videochat,
}

impl ClientEvent {
    #[must_use]
    pub const fn family(&self) -> Family {
        match self {
            Self::CreateRoom { .. }
            | Self::JoinRoom { .. }
            | Self::LeaveRoom { .. }
            | Self::KickUser { .. }
            | Self::PromoteHost { .. } => Family::Lobby,
            Self::SetVideo { .. }
            | Self::PlayVideo { .. }
            | Self::PauseVideo { .. }
            | Self::SeekVideo { .. }
            | Self::SyncCheck { .. }
            | Self::VideoErrorReport { .. } => Family::Video,
            Self::SendMessage { .. }
            | Self::ToggleReaction { .. }
            | Self::TypingStart { .. }
            | Self::TypingStop { .. } => Family::Chat,
            Self::VoiceJoin { .. }
            | Self::VoiceLeave { .. }
            | Self::VoiceOffer { .. }
            | Self::VoiceAnswer { .. }
            | Self::VoiceIceCandidate { .. } => Family::Voice,
            Self::VideochatJoin { .. }
            | Self::VideochatLeave { .. }
            | Self::VideochatOffer { .. }
            | Self::VideochatAnswer { .. }
            | Self::VideochatIceCandidate { .. } => Family::Videochat,
        }
    }

    /// Lobby entry points may run before the connection is bound to a room.
    #[must_use]
    pub const fn is_entry(&self) -> bool {
        matches!(self, Self::CreateRoom { .. } | Self::JoinRoom { .. })
    }
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    // Lobby
    RoomCreated {
        room_id: String,
        /// Only ever sent to the creator, here.
        host_token: String,
        room: RoomSnapshot,
    },
    RoomJoined {
        room: RoomSnapshot,
        user: RoomUser,
        chat_history: Vec<ChatMessage>,
    },
    RoomError {
        error: String,
        code: ErrorCode,
    },
    UserJoined {
        user: RoomUser,
    },
    UserLeft {
        user_id: String,
    },
    UserPromoted {
        user_id: String,
        user_name: String,
    },
    UserKicked {
        user_id: String,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kicked_by: Option<String>,
    },

    // Video
    VideoSet {
        video_url: String,
        video_type: VideoType,
        video_meta: VideoMeta,
    },
    VideoPlayed {
        current_time: f64,
        timestamp: i64,
    },
    VideoPaused {
        current_time: f64,
        timestamp: i64,
    },
    VideoSeeked {
        current_time: f64,
        timestamp: i64,
    },
    SyncUpdate {
        current_time: f64,
        is_playing: bool,
        timestamp: i64,
    },

    // Chat
    NewMessage {
        message: ChatMessage,
    },
    ReactionUpdated {
        message_id: String,
        emoji: String,
        user_id: String,
        reactions: BTreeMap<String, Vec<String>>,
        action: ReactionAction,
    },
    UserTyping {
        user_id: String,
        user_name: String,
    },
    UserStoppedTyping {
        user_id: String,
    },

    // Voice mesh
    VoiceExistingPeers {
        user_ids: Vec<String>,
    },
    VoicePeerJoined {
        user_id: String,
    },
    VoiceOfferReceived {
        from_user_id: String,
        sdp: String,
    },
    VoiceAnswerReceived {
        from_user_id: String,
        sdp: String,
    },
    VoiceIceCandidateReceived {
        from_user_id: String,
        candidate: serde_json::Value,
    },
    VoicePeerLeft {
        user_id: String,
    },
    VoiceParticipantCount {
        room_id: String,
        count: usize,
    },
    VoiceError {
        error: String,
        code: ErrorCode,
    },

    // Camera mesh
    VideochatExistingPeers {
        user_ids: Vec<String>,
    },
    VideochatPeerJoined {
        user_id: String,
    },
    VideochatOfferReceived {
        from_user_id: String,
        sdp: String,
    },
    VideochatAnswerReceived {
        from_user_id: String,
        sdp: String,
    },
    VideochatIceCandidateReceived {
        from_user_id: String,
        candidate: serde_json::Value,
    },
    VideochatPeerLeft {
        user_id: String,
    },
    VideochatParticipantCount {
        room_id: String,
        count: usize,
    },
    VideochatError {
        error: String,
        code: ErrorCode,
    },
}
