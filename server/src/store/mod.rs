//! Store Layer
//!
//! Redis-backed repositories for rooms, chat history, and the
//! userId -> connection identity map, behind a thin K/V adapter.

mod memory;
pub mod models;

pub mod chat;
pub mod rooms;
pub mod sockets;

use fred::prelude::*;
use fred::types::config::Config as RedisConfig;
use fred::types::scan::Scanner;
use fred::types::Expiration;
use futures::TryStreamExt;
use thiserror::Error;
use tracing::info;

pub use chat::ChatRepository;
pub use memory::MemoryKv;
pub use rooms::RoomRepository;
pub use sockets::SocketMap;

use crate::error::RoomError;

/// Errors raised by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis failure.
    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A stored record failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A read-modify-write lost its race too many times.
    #[error("conflicting concurrent update: {0}")]
    Conflict(String),
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Key construction for everything the server persists.
pub mod keys {
    /// Room record, TTL 24 h.
    #[must_use]
    pub fn room(room_id: &str) -> String {
        format!("room:{room_id}")
    }

    /// Left-pushed chat list, trimmed to the history cap, TTL 24 h.
    #[must_use]
    pub fn chat(room_id: &str) -> String {
        format!("chat:{room_id}")
    }

    /// Monotone message id counter per room.
    #[must_use]
    pub fn chat_seq(room_id: &str) -> String {
        format!("chat-seq:{room_id}")
    }

    /// userId -> connection id, TTL 2 h.
    #[must_use]
    pub fn user_socket(user_id: &str) -> String {
        format!("user_socket:{user_id}")
    }

    /// Set of live room ids.
    pub const ACTIVE_ROOMS: &str = "active-rooms";
}

/// K/V adapter over the shared store.
///
/// Two implementations behind one enum: `Redis` for deployments, `Memory`
/// for tests and single-node dev runs. Repositories only ever talk to this
/// capability set.
#[derive(Clone)]
pub enum Kv {
    Redis(Client),
    Memory(MemoryKv),
}

impl Kv {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let config = RedisConfig::from_url(redis_url)?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client.wait_for_connect().await?;

        info!("Connected to Redis");
        Ok(Self::Redis(client))
    }

    /// In-process store for tests and single-node runs.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(MemoryKv::new())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Redis(c) => Ok(c.get(key).await?),
            Self::Memory(m) => Ok(m.get(key).await),
        }
    }

    /// SET with a TTL in seconds.
    pub async fn set_ex(&self, key: &str, value: &str, ttl: i64) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c
                    .set(key, value, Some(Expiration::EX(ttl)), None, false)
                    .await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.set_ex(key, value, ttl).await;
                Ok(())
            }
        }
    }

    pub async fn del(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.del(key).await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.del(key).await;
                Ok(())
            }
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            Self::Redis(c) => Ok(c.exists(key).await?),
            Self::Memory(m) => Ok(m.exists(key).await),
        }
    }

    /// Refresh a key's TTL in seconds.
    pub async fn expire(&self, key: &str, ttl: i64) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.expire(key, ttl, None).await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.expire(key, ttl).await;
                Ok(())
            }
        }
    }

    pub async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.lpush(key, value).await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.lpush(key, value).await;
                Ok(())
            }
        }
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.ltrim(key, start, stop).await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.ltrim(key, start, stop).await;
                Ok(())
            }
        }
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(c) => Ok(c.lrange(key, start, stop).await?),
            Self::Memory(m) => Ok(m.lrange(key, start, stop).await),
        }
    }

    /// Overwrite the list element at `index`. Fails if the index is out of
    /// range, which callers treat as a lost race.
    pub async fn lset(&self, key: &str, index: i64, value: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.lset(key, index, value).await?;
                Ok(())
            }
            Self::Memory(m) => m.lset(key, index, value).await,
        }
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.sadd(key, member).await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.sadd(key, member).await;
                Ok(())
            }
        }
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: () = c.srem(key, member).await?;
                Ok(())
            }
            Self::Memory(m) => {
                m.srem(key, member).await;
                Ok(())
            }
        }
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(c) => Ok(c.smembers(key).await?),
            Self::Memory(m) => Ok(m.smembers(key).await),
        }
    }

    /// Cursor-based scan over keys matching `prefix`. Ordering is not stable.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(c) => {
                let mut stream = c.scan(format!("{prefix}*"), Some(100), None);
                let mut keys = Vec::new();
                while let Some(mut page) = stream.try_next().await? {
                    if let Some(page_keys) = page.take_results() {
                        keys.extend(page_keys.into_iter().filter_map(|k| k.into_string()));
                    }
                    let _ = page.next();
                }
                Ok(keys)
            }
            Self::Memory(m) => Ok(m.scan_prefix(prefix).await),
        }
    }

    pub async fn mget(&self, req_keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if req_keys.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Redis(c) => Ok(c.mget(req_keys.to_vec()).await?),
            Self::Memory(m) => Ok(m.mget(req_keys).await),
        }
    }

    /// Atomic increment, returning the new value.
    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        match self {
            Self::Redis(c) => Ok(c.incr(key).await?),
            Self::Memory(m) => Ok(m.incr(key).await),
        }
    }

    /// Store round-trip used by the health endpoint.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Redis(c) => {
                let _: String = c.ping(None).await?;
                Ok(())
            }
            Self::Memory(_) => Ok(()),
        }
    }
}
