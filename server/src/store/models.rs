//! Stored record types: rooms, members, playback state, chat messages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolve::VideoMeta;

/// A member of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    /// Stable opaque id, survives reconnects.
    pub id: String,
    /// Display name, unique within the room.
    pub name: String,
    /// Host privilege flag. Multiple hosts may coexist.
    pub is_host: bool,
    /// When the user first joined.
    pub joined_at: DateTime<Utc>,
}

/// Kind of media a room is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Youtube,
    Mp4,
    M3u8,
    #[default]
    None,
}

/// Authoritative playback state.
///
/// Consumers compute the presentation time as
/// `current_time + (now - last_update_time) / 1000` while playing, else
/// `current_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    pub is_playing: bool,
    /// Seconds into the asset at `last_update_time`.
    pub current_time: f64,
    /// Asset duration in seconds, 0 when unknown.
    pub duration: f64,
    /// Wall-clock milliseconds of the last authoritative update.
    pub last_update_time: i64,
}

impl VideoState {
    /// Fresh state, applied whenever the video URL changes.
    #[must_use]
    pub const fn reset(now_ms: i64) -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            last_update_time: now_ms,
        }
    }

    /// Where playback sits right now, extrapolated from the last update.
    #[must_use]
    pub fn presentation_time(&self, now_ms: i64) -> f64 {
        if self.is_playing {
            self.current_time + (now_ms - self.last_update_time) as f64 / 1000.0
        } else {
            self.current_time
        }
    }
}

/// A room record as persisted. Outbound events carry [`RoomSnapshot`]
/// instead; the host token never leaves the store except on `room-created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    /// Primary host (the creator, unless succession occurred).
    pub host_id: String,
    pub host_name: String,
    /// Secret minted at creation; required to rejoin as host.
    pub host_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub video_type: VideoType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_meta: Option<VideoMeta>,
    pub video_state: VideoState,
    /// Insertion order is succession order.
    pub users: Vec<RoomUser>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    #[must_use]
    pub fn user(&self, user_id: &str) -> Option<&RoomUser> {
        self.users.iter().find(|u| u.id == user_id)
    }

    #[must_use]
    pub fn user_by_name(&self, name: &str) -> Option<&RoomUser> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Whether `user_id` holds host privileges (primary or promoted).
    #[must_use]
    pub fn is_host(&self, user_id: &str) -> bool {
        self.user(user_id).is_some_and(|u| u.is_host)
    }

    /// Public view of the room, without the host token.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            host_id: self.host_id.clone(),
            host_name: self.host_name.clone(),
            video_url: self.video_url.clone(),
            video_type: self.video_type,
            video_meta: self.video_meta.clone(),
            video_state: self.video_state.clone(),
            users: self.users.clone(),
            created_at: self.created_at,
        }
    }
}

/// What clients see of a room. Identical to [`Room`] minus the host token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: String,
    pub host_id: String,
    pub host_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub video_type: VideoType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_meta: Option<VideoMeta>,
    pub video_state: VideoState,
    pub users: Vec<RoomUser>,
    pub created_at: DateTime<Utc>,
}

/// Condensed view of the message a chat message replies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub message_id: String,
    pub user_id: String,
    pub user_name: String,
    /// Truncated to 150 chars.
    pub message: String,
}

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Added,
    Removed,
}

/// A chat message with per-emoji reaction sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Monotone within a room.
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub room_id: String,
    /// emoji -> user ids, no duplicates per set.
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}

impl ChatMessage {
    /// Toggle `user_id`'s reaction under `emoji`. A user appears in at most
    /// one slot per emoji; a second toggle removes the first.
    pub fn toggle_reaction(&mut self, emoji: &str, user_id: &str) -> ReactionAction {
        let set = self.reactions.entry(emoji.to_string()).or_default();
        if let Some(pos) = set.iter().position(|u| u == user_id) {
            set.remove(pos);
            ReactionAction::Removed
        } else {
            set.push(user_id.to_string());
            ReactionAction::Added
        }
    }
}
