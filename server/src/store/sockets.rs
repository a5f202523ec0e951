//! Identity Map
//!
//! `userId -> live connection id`, TTL-backed so identities cannot leak
//! when disconnect cleanup fails. Refreshed on every write; the signaling
//! relay reads it to route targeted events.

use super::{keys, Kv, StoreError};

/// Repository for the identity map (`user_socket:<userId>`).
#[derive(Clone)]
pub struct SocketMap {
    kv: Kv,
    ttl: i64,
}

impl SocketMap {
    #[must_use]
    pub const fn new(kv: Kv, ttl: i64) -> Self {
        Self { kv, ttl }
    }

    /// Bind (or rebind) a user to a connection, refreshing the TTL.
    pub async fn set(&self, user_id: &str, conn_id: &str) -> Result<(), StoreError> {
        self.kv
            .set_ex(&keys::user_socket(user_id), conn_id, self.ttl)
            .await
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.kv.get(&keys::user_socket(user_id)).await
    }

    /// Connection ids for a batch of users, in request order.
    pub async fn get_many(&self, user_ids: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let ks: Vec<String> = user_ids.iter().map(|id| keys::user_socket(id)).collect();
        self.kv.mget(&ks).await
    }

    pub async fn remove(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.del(&keys::user_socket(user_id)).await
    }

    pub async fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        self.kv.exists(&keys::user_socket(user_id)).await
    }

    /// All user ids with a live mapping. Scan-based; ordering not stable.
    pub async fn scan(&self) -> Result<Vec<String>, StoreError> {
        let prefix = keys::user_socket("");
        let keys = self.kv.scan_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(ToString::to_string))
            .collect())
    }
}
