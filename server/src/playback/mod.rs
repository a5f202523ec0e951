//! Playback Coordinator
//!
//! Authoritative video state for a room. Hosts drive the transport
//! (play/pause/seek), set new sources through the resolver, and report a
//! periodic sync heartbeat the server uses to push drift corrections to
//! guests.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::RoomError;
use crate::events::ServerEvent;
use crate::gateway::{self, ConnId};
use crate::store::models::{Room, VideoState};
use crate::util::now_ms;

/// Distinct reporters needed before a direct source is flipped to proxy.
const PROXY_FLIP_REPORTS: usize = 3;

/// Transport operation a host issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Play,
    Pause,
    Seek,
}

/// Playback failure reporters per room. In-process; reset when the source
/// changes or the room closes.
#[derive(Default)]
pub struct ErrorReports {
    reports: DashMap<String, HashSet<String>>,
}

impl ErrorReports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reporter; returns the distinct count for the room.
    pub fn record(&self, room_id: &str, user_id: &str) -> usize {
        let mut set = self.reports.entry(room_id.to_string()).or_default();
        set.insert(user_id.to_string());
        set.len()
    }

    pub fn clear(&self, room_id: &str) {
        self.reports.remove(room_id);
    }
}

/// Load the room and check the caller holds host privileges.
async fn host_room(state: &AppState, user_id: &str, room_id: &str) -> Result<Room, RoomError> {
    let room = state
        .rooms
        .get(room_id)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    if !room.is_host(user_id) {
        return Err(RoomError::HostOnly);
    }
    Ok(room)
}

/// Host sets a new video. Resolution runs before the room lock is taken;
/// the probe can take seconds and must not stall other mutations.
pub async fn handle_set_video(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    video_url: &str,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;

    // Cheap pre-check so non-hosts never trigger probe traffic.
    host_room(state, &user_id, room_id).await?;

    let meta = state.resolver.resolve(video_url).await;

    let guard = state.room_locks.acquire(room_id).await;
    host_room(state, &user_id, room_id).await?;
    let room = state
        .rooms
        .set_video(room_id, video_url, meta.video_type, Some(meta.clone()))
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    drop(guard);

    state.playback_reports.clear(room_id);

    info!(
        room_id,
        video_url,
        delivery = ?meta.delivery_type,
        "Video set"
    );

    gateway::emit_to_room(
        state,
        &room,
        &ServerEvent::VideoSet {
            video_url: video_url.to_string(),
            video_type: meta.video_type,
            video_meta: meta,
        },
    )
    .await;
    Ok(())
}

/// Host play/pause/seek. The new state is stored with the server's clock,
/// then fanned out to everyone except the caller, who already applied it.
pub async fn handle_transport(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    current_time: f64,
    op: Transport,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;

    let guard = state.room_locks.acquire(room_id).await;
    let room = host_room(state, &user_id, room_id).await?;

    let now = now_ms();
    let is_playing = match op {
        Transport::Play => true,
        Transport::Pause => false,
        // Seeking keeps the transport running or paused as it was
        Transport::Seek => room.video_state.is_playing,
    };
    let video_state = VideoState {
        is_playing,
        current_time,
        duration: room.video_state.duration,
        last_update_time: now,
    };
    let room = state
        .rooms
        .update_video_state(room_id, video_state)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    drop(guard);

    let event = match op {
        Transport::Play => ServerEvent::VideoPlayed {
            current_time,
            timestamp: now,
        },
        Transport::Pause => ServerEvent::VideoPaused {
            current_time,
            timestamp: now,
        },
        Transport::Seek => ServerEvent::VideoSeeked {
            current_time,
            timestamp: now,
        },
    };
    gateway::emit_to_room_except(state, &room, &user_id, &event).await;
    Ok(())
}

/// Host heartbeat. Updates the authoritative state and pushes a
/// `sync-update` to guests when the report disagrees with the
/// extrapolated prior state by more than the drift threshold.
pub async fn handle_sync_check(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    current_time: f64,
    is_playing: bool,
    timestamp: i64,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;

    let guard = state.room_locks.acquire(room_id).await;
    let room = host_room(state, &user_id, room_id).await?;

    let now = now_ms();
    let expected = room.video_state.presentation_time(now);
    let drift = (expected - current_time).abs();

    let video_state = VideoState {
        is_playing,
        current_time,
        duration: room.video_state.duration,
        last_update_time: now,
    };
    let room = state
        .rooms
        .update_video_state(room_id, video_state)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    drop(guard);

    if drift > state.config.drift_threshold {
        info!(room_id, drift, "Drift correction");
        gateway::emit_to_room_except(
            state,
            &room,
            &user_id,
            &ServerEvent::SyncUpdate {
                current_time,
                is_playing,
                timestamp,
            },
        )
        .await;
    }
    Ok(())
}

/// Guest reports a late playback failure. After enough distinct reporters
/// on a direct-delivery source, the stored meta flips to proxy mode and
/// `video-set` is rebroadcast.
pub async fn handle_error_report(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    code: Option<i32>,
    message: Option<&str>,
    current_src: &str,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;
    let room = state
        .rooms
        .get(room_id)
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    if room.user(&user_id).is_none() {
        return Err(RoomError::NotAuthenticated);
    }

    warn!(
        room_id,
        %user_id,
        code = code.unwrap_or_default(),
        message = message.unwrap_or_default(),
        current_src,
        "Playback failure reported"
    );

    // Only direct file delivery has a proxy to fall back to, and only for
    // the source the room is actually playing.
    let direct = room
        .video_meta
        .as_ref()
        .is_some_and(|meta| !meta.requires_proxy && meta.playback_url == current_src);
    if !direct {
        return Ok(());
    }

    if state.playback_reports.record(room_id, &user_id) < PROXY_FLIP_REPORTS {
        return Ok(());
    }

    let guard = state.room_locks.acquire(room_id).await;
    let Some(room) = state.rooms.get(room_id).await? else {
        return Ok(());
    };
    let Some(meta) = room.video_meta.as_ref().filter(|m| !m.requires_proxy) else {
        return Ok(());
    };
    let Some(video_url) = room.video_url.clone() else {
        return Ok(());
    };

    let proxied = state.resolver.to_proxy(meta);
    let room = state
        .rooms
        .set_video(room_id, &video_url, proxied.video_type, Some(proxied.clone()))
        .await?
        .ok_or(RoomError::RoomNotFound)?;
    drop(guard);

    state.playback_reports.clear(room_id);

    info!(room_id, "Direct delivery failing, switched to proxy");

    gateway::emit_to_room(
        state,
        &room,
        &ServerEvent::VideoSet {
            video_url,
            video_type: proxied.video_type,
            video_meta: proxied,
        },
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reports_count_distinct_users() {
        let reports = ErrorReports::new();
        assert_eq!(reports.record("R", "u1"), 1);
        assert_eq!(reports.record("R", "u1"), 1);
        assert_eq!(reports.record("R", "u2"), 2);
        assert_eq!(reports.record("R", "u3"), 3);

        reports.clear("R");
        assert_eq!(reports.record("R", "u1"), 1);
    }

    #[test]
    fn test_error_reports_are_per_room() {
        let reports = ErrorReports::new();
        reports.record("A", "u1");
        reports.record("A", "u2");
        assert_eq!(reports.record("B", "u1"), 1);
    }
}
