//! Chat Repository
//!
//! Bounded per-room message list plus in-place reaction rewrites.
//! Messages are left-pushed (`chat:<roomId>`), trimmed to the history cap,
//! and retrieved oldest-first.

use tracing::warn;

use super::models::ChatMessage;
use super::{keys, Kv, StoreError};

/// How many times a reaction rewrite retries after losing a race with a
/// concurrent append before giving up.
const UPDATE_ATTEMPTS: usize = 3;

/// Repository for chat history (`chat:<roomId>`, `chat-seq:<roomId>`).
#[derive(Clone)]
pub struct ChatRepository {
    kv: Kv,
    cap: usize,
    ttl: i64,
}

impl ChatRepository {
    #[must_use]
    pub const fn new(kv: Kv, cap: usize, ttl: i64) -> Self {
        Self { kv, cap, ttl }
    }

    /// Next monotone message id for a room.
    pub async fn next_id(&self, room_id: &str) -> Result<i64, StoreError> {
        let seq = self.kv.incr(&keys::chat_seq(room_id)).await?;
        self.kv.expire(&keys::chat_seq(room_id), self.ttl).await?;
        Ok(seq)
    }

    /// Push a message and trim to the newest `cap`.
    pub async fn append(&self, room_id: &str, msg: &ChatMessage) -> Result<(), StoreError> {
        let key = keys::chat(room_id);
        let json = serde_json::to_string(msg)?;
        self.kv.lpush(&key, &json).await?;
        self.kv.ltrim(&key, 0, self.cap as i64 - 1).await?;
        self.kv.expire(&key, self.ttl).await?;
        Ok(())
    }

    /// Full retained history, oldest-first. Unreadable entries are skipped.
    pub async fn history(&self, room_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let raw = self.kv.lrange(&keys::chat(room_id), 0, -1).await?;
        let mut messages: Vec<ChatMessage> = raw
            .iter()
            .filter_map(|json| match serde_json::from_str(json) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!(room_id, error = %e, "Dropping unreadable chat entry");
                    None
                }
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Drop a room's history and id counter.
    pub async fn clear(&self, room_id: &str) -> Result<(), StoreError> {
        self.kv.del(&keys::chat(room_id)).await?;
        self.kv.del(&keys::chat_seq(room_id)).await?;
        Ok(())
    }

    /// Rewrite the message with `message_id` in place via `mutate`,
    /// returning the new value and whatever `mutate` produced.
    ///
    /// A concurrent append shifts list indices, so after LSET the slot is
    /// re-read and the id compared; a mismatch retries the whole
    /// read-modify-write, bounded by [`UPDATE_ATTEMPTS`]. Callers serialize
    /// per (room, message) with an advisory lock; the retry loop covers
    /// appends racing in from other server instances.
    pub async fn update_message<T>(
        &self,
        room_id: &str,
        message_id: &str,
        mutate: impl Fn(&mut ChatMessage) -> T,
    ) -> Result<Option<(ChatMessage, T)>, StoreError> {
        let key = keys::chat(room_id);

        for _ in 0..UPDATE_ATTEMPTS {
            let raw = self.kv.lrange(&key, 0, -1).await?;
            let found = raw.iter().enumerate().find_map(|(idx, json)| {
                serde_json::from_str::<ChatMessage>(json)
                    .ok()
                    .filter(|m| m.id == message_id)
                    .map(|m| (idx, m))
            });
            let Some((idx, mut msg)) = found else {
                return Ok(None);
            };

            let out = mutate(&mut msg);
            let json = serde_json::to_string(&msg)?;
            if self.kv.lset(&key, idx as i64, &json).await.is_err() {
                // List shrank under us; take another look.
                continue;
            }

            // Confirm the slot still holds this message.
            let check = self.kv.lrange(&key, idx as i64, idx as i64).await?;
            let settled = check
                .first()
                .and_then(|json| serde_json::from_str::<ChatMessage>(json).ok())
                .is_some_and(|m| m.id == message_id);
            if settled {
                return Ok(Some((msg, out)));
            }
        }

        Err(StoreError::Conflict(format!(
            "reaction update lost {UPDATE_ATTEMPTS} races on {room_id}/{message_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::ReactionAction;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn repo(cap: usize) -> ChatRepository {
        ChatRepository::new(Kv::memory(), cap, 86400)
    }

    fn msg(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            user_id: "u1".into(),
            user_name: "Alice".into(),
            message: text.into(),
            timestamp: Utc::now(),
            room_id: "ABC123".into(),
            reactions: BTreeMap::new(),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_history_is_oldest_first() {
        let repo = repo(10);
        for i in 1..=3 {
            repo.append("ABC123", &msg(&i.to_string(), &format!("m{i}")))
                .await
                .unwrap();
        }

        let history = repo.history("ABC123").await.unwrap();
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let repo = repo(3);
        for i in 1..=5 {
            repo.append("ABC123", &msg(&i.to_string(), "x"))
                .await
                .unwrap();
        }

        let history = repo.history("ABC123").await.unwrap();
        assert_eq!(history.len(), 3);
        // Oldest two were trimmed away
        assert_eq!(history[0].id, "3");
        assert_eq!(history[2].id, "5");
    }

    #[tokio::test]
    async fn test_next_id_is_monotone() {
        let repo = repo(10);
        assert_eq!(repo.next_id("ABC123").await.unwrap(), 1);
        assert_eq!(repo.next_id("ABC123").await.unwrap(), 2);
        // Independent per room
        assert_eq!(repo.next_id("XYZ789").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_message_rewrites_in_place() {
        let repo = repo(10);
        repo.append("ABC123", &msg("1", "hello")).await.unwrap();
        repo.append("ABC123", &msg("2", "world")).await.unwrap();

        let (updated, action) = repo
            .update_message("ABC123", "1", |m| m.toggle_reaction("👍", "u2"))
            .await
            .unwrap()
            .expect("message should exist");

        assert_eq!(action, ReactionAction::Added);
        assert_eq!(updated.reactions["👍"], vec!["u2"]);

        let history = repo.history("ABC123").await.unwrap();
        assert_eq!(history[0].reactions["👍"], vec!["u2"]);
        assert!(history[1].reactions.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_message_returns_none() {
        let repo = repo(10);
        repo.append("ABC123", &msg("1", "hello")).await.unwrap();

        let result = repo
            .update_message("ABC123", "99", |m| m.toggle_reaction("👍", "u2"))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
