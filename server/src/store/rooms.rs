//! Room Repository
//!
//! CRUD for room records plus the membership mutations the coordinators
//! build on. Callers serialize mutations per room with an advisory lock;
//! this layer only guarantees each operation's own read-modify-write.

use tracing::warn;

use super::models::{Room, RoomUser, VideoState, VideoType};
use super::{keys, Kv, StoreError};
use crate::resolve::VideoMeta;
use crate::util::now_ms;

/// Outcome of removing a user from a room.
#[derive(Debug)]
pub enum RemoveOutcome {
    /// No such room.
    NotFound,
    /// The removed user was the last member; the room is gone.
    Deleted,
    /// The user was removed; the room lives on.
    Removed {
        room: Room,
        /// Set when the removed user was the primary host and succession
        /// promoted the longest-standing member.
        promoted: Option<RoomUser>,
    },
}

/// Repository for room records (`room:<id>`, `active-rooms`).
#[derive(Clone)]
pub struct RoomRepository {
    kv: Kv,
    ttl: i64,
}

impl RoomRepository {
    #[must_use]
    pub const fn new(kv: Kv, ttl: i64) -> Self {
        Self { kv, ttl }
    }

    /// Persist a freshly created room and register it as active.
    pub async fn create(&self, room: &Room) -> Result<(), StoreError> {
        let json = serde_json::to_string(room)?;
        self.kv.set_ex(&keys::room(&room.id), &json, self.ttl).await?;
        self.kv.sadd(keys::ACTIVE_ROOMS, &room.id).await?;
        Ok(())
    }

    pub async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let Some(json) = self.kv.get(&keys::room(room_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(room) => Ok(Some(room)),
            Err(e) => {
                warn!(room_id, error = %e, "Dropping unreadable room record");
                Ok(None)
            }
        }
    }

    /// Rewrite the full record, refreshing its TTL.
    pub async fn update(&self, room: &Room) -> Result<(), StoreError> {
        let json = serde_json::to_string(room)?;
        self.kv.set_ex(&keys::room(&room.id), &json, self.ttl).await
    }

    pub async fn delete(&self, room_id: &str) -> Result<(), StoreError> {
        self.kv.del(&keys::room(room_id)).await?;
        self.kv.srem(keys::ACTIVE_ROOMS, room_id).await?;
        Ok(())
    }

    pub async fn exists(&self, room_id: &str) -> Result<bool, StoreError> {
        self.kv.exists(&keys::room(room_id)).await
    }

    /// Room ids currently registered as active. May contain ids whose
    /// record has since expired; the sweeper prunes those.
    pub async fn active_rooms(&self) -> Result<Vec<String>, StoreError> {
        self.kv.smembers(keys::ACTIVE_ROOMS).await
    }

    /// Drop a stale id from the active set.
    pub async fn deregister(&self, room_id: &str) -> Result<(), StoreError> {
        self.kv.srem(keys::ACTIVE_ROOMS, room_id).await
    }

    /// Append a user. Idempotent on user id: any prior entry is replaced,
    /// keeping display names unique and succession order sane.
    pub async fn add_user(&self, room_id: &str, user: RoomUser) -> Result<Option<Room>, StoreError> {
        let Some(mut room) = self.get(room_id).await? else {
            return Ok(None);
        };
        room.users.retain(|u| u.id != user.id);
        room.users.push(user);
        self.update(&room).await?;
        Ok(Some(room))
    }

    /// Remove a user. Deletes the room when it empties; otherwise promotes
    /// `users[0]` if the removed user was the primary host, mirroring
    /// `host_id` / `host_name` / `is_host`.
    pub async fn remove_user(&self, room_id: &str, user_id: &str) -> Result<RemoveOutcome, StoreError> {
        let Some(mut room) = self.get(room_id).await? else {
            return Ok(RemoveOutcome::NotFound);
        };

        room.users.retain(|u| u.id != user_id);
        if room.users.is_empty() {
            self.delete(room_id).await?;
            return Ok(RemoveOutcome::Deleted);
        }

        let mut promoted = None;
        if room.host_id == user_id {
            room.users[0].is_host = true;
            room.host_id = room.users[0].id.clone();
            room.host_name = room.users[0].name.clone();
            promoted = Some(room.users[0].clone());
        }

        self.update(&room).await?;
        Ok(RemoveOutcome::Removed { room, promoted })
    }

    /// Flip a member's host flag. Returns the updated room.
    pub async fn set_host_flag(
        &self,
        room_id: &str,
        user_id: &str,
        is_host: bool,
    ) -> Result<Option<Room>, StoreError> {
        let Some(mut room) = self.get(room_id).await? else {
            return Ok(None);
        };
        let Some(user) = room.users.iter_mut().find(|u| u.id == user_id) else {
            return Ok(None);
        };
        user.is_host = is_host;
        self.update(&room).await?;
        Ok(Some(room))
    }

    /// Attach a new video source, resetting playback state.
    pub async fn set_video(
        &self,
        room_id: &str,
        url: &str,
        video_type: VideoType,
        meta: Option<VideoMeta>,
    ) -> Result<Option<Room>, StoreError> {
        let Some(mut room) = self.get(room_id).await? else {
            return Ok(None);
        };
        room.video_url = Some(url.to_string());
        room.video_type = video_type;
        room.video_meta = meta;
        room.video_state = VideoState::reset(now_ms());
        self.update(&room).await?;
        Ok(Some(room))
    }

    pub async fn update_video_state(
        &self,
        room_id: &str,
        state: VideoState,
    ) -> Result<Option<Room>, StoreError> {
        let Some(mut room) = self.get(room_id).await? else {
            return Ok(None);
        };
        room.video_state = state;
        self.update(&room).await?;
        Ok(Some(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn repo() -> RoomRepository {
        RoomRepository::new(Kv::memory(), 86400)
    }

    fn user(id: &str, name: &str, is_host: bool) -> RoomUser {
        RoomUser {
            id: id.into(),
            name: name.into(),
            is_host,
            joined_at: Utc::now(),
        }
    }

    fn room_with_host() -> Room {
        Room {
            id: "ABC123".into(),
            host_id: "u1".into(),
            host_name: "Alice".into(),
            host_token: "token".into(),
            video_url: None,
            video_type: VideoType::None,
            video_meta: None,
            video_state: VideoState::reset(0),
            users: vec![user("u1", "Alice", true)],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_registers_active_room() {
        let repo = repo();
        repo.create(&room_with_host()).await.unwrap();

        assert!(repo.exists("ABC123").await.unwrap());
        assert_eq!(repo.active_rooms().await.unwrap(), vec!["ABC123"]);

        let loaded = repo.get("ABC123").await.unwrap().unwrap();
        assert_eq!(loaded.host_name, "Alice");
    }

    #[tokio::test]
    async fn test_add_user_is_idempotent_on_id() {
        let repo = repo();
        repo.create(&room_with_host()).await.unwrap();

        repo.add_user("ABC123", user("u2", "Bob", false))
            .await
            .unwrap();
        let room = repo
            .add_user("ABC123", user("u2", "Bobby", false))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(room.users.len(), 2);
        assert_eq!(room.users[1].name, "Bobby");
    }

    #[tokio::test]
    async fn test_remove_last_user_deletes_room() {
        let repo = repo();
        repo.create(&room_with_host()).await.unwrap();

        let outcome = repo.remove_user("ABC123", "u1").await.unwrap();
        assert!(matches!(outcome, RemoveOutcome::Deleted));
        assert!(!repo.exists("ABC123").await.unwrap());
        assert!(repo.active_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_primary_host_promotes_first_member() {
        let repo = repo();
        repo.create(&room_with_host()).await.unwrap();
        repo.add_user("ABC123", user("u2", "Bob", false))
            .await
            .unwrap();

        let outcome = repo.remove_user("ABC123", "u1").await.unwrap();
        let RemoveOutcome::Removed { room, promoted } = outcome else {
            panic!("expected Removed");
        };

        let promoted = promoted.expect("succession should promote");
        assert_eq!(promoted.id, "u2");
        assert_eq!(room.host_id, "u2");
        assert_eq!(room.host_name, "Bob");
        assert!(room.users[0].is_host);
    }

    #[tokio::test]
    async fn test_remove_guest_needs_no_succession() {
        let repo = repo();
        repo.create(&room_with_host()).await.unwrap();
        repo.add_user("ABC123", user("u2", "Bob", false))
            .await
            .unwrap();

        let outcome = repo.remove_user("ABC123", "u2").await.unwrap();
        let RemoveOutcome::Removed { room, promoted } = outcome else {
            panic!("expected Removed");
        };
        assert!(promoted.is_none());
        assert_eq!(room.host_id, "u1");
    }

    #[tokio::test]
    async fn test_set_video_resets_playback_state() {
        let repo = repo();
        let mut room = room_with_host();
        room.video_state.is_playing = true;
        room.video_state.current_time = 99.0;
        repo.create(&room).await.unwrap();

        let updated = repo
            .set_video("ABC123", "https://example.com/a.mp4", VideoType::Mp4, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.video_url.as_deref(), Some("https://example.com/a.mp4"));
        assert_eq!(updated.video_type, VideoType::Mp4);
        assert!(!updated.video_state.is_playing);
        assert!(updated.video_state.current_time.abs() < f64::EPSILON);
    }
}
