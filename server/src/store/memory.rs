//! In-process K/V implementation.
//!
//! Mirrors the Redis command semantics the repositories rely on (including
//! lazy TTL expiry and LRANGE index conventions) so tests and single-node
//! runs behave like the real store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::StoreError;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory store with Redis-like semantics.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut map = self.inner.lock().await;
        map.retain(|_, entry| !entry.expired());
        f(&mut map)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.with_map(|map| {
            map.get(key).and_then(|e| match &e.value {
                Value::Str(s) => Some(s.clone()),
                _ => None,
            })
        })
        .await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: i64) {
        let entry = Entry {
            value: Value::Str(value.to_string()),
            expires_at: ttl_deadline(ttl),
        };
        self.with_map(|map| {
            map.insert(key.to_string(), entry);
        })
        .await;
    }

    pub async fn del(&self, key: &str) {
        self.with_map(|map| {
            map.remove(key);
        })
        .await;
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.with_map(|map| map.contains_key(key)).await
    }

    pub async fn expire(&self, key: &str, ttl: i64) {
        self.with_map(|map| {
            if let Some(entry) = map.get_mut(key) {
                entry.expires_at = ttl_deadline(ttl);
            }
        })
        .await;
    }

    pub async fn lpush(&self, key: &str, value: &str) {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            if let Value::List(list) = &mut entry.value {
                list.push_front(value.to_string());
            }
        })
        .await;
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) {
        self.with_map(|map| {
            if let Some(Entry {
                value: Value::List(list),
                ..
            }) = map.get_mut(key)
            {
                let kept: VecDeque<String> = match resolve_range(start, stop, list.len()) {
                    Some((start, stop)) => list
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i >= start && *i <= stop)
                        .map(|(_, v)| v.clone())
                        .collect(),
                    None => VecDeque::new(),
                };
                *list = kept;
            }
        })
        .await;
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        self.with_map(|map| match map.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => match resolve_range(start, stop, list.len()) {
                Some((start, stop)) => list
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i >= start && *i <= stop)
                    .map(|(_, v)| v.clone())
                    .collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        })
        .await
    }

    pub async fn lset(&self, key: &str, index: i64, value: &str) -> Result<(), StoreError> {
        self.with_map(|map| {
            let list = match map.get_mut(key) {
                Some(Entry {
                    value: Value::List(list),
                    ..
                }) => list,
                _ => return Err(StoreError::Conflict(format!("no list at {key}"))),
            };
            let idx = usize::try_from(index)
                .ok()
                .filter(|i| *i < list.len())
                .ok_or_else(|| StoreError::Conflict(format!("index {index} out of range")))?;
            list[idx] = value.to_string();
            Ok(())
        })
        .await
    }

    pub async fn sadd(&self, key: &str, member: &str) {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            if let Value::Set(set) = &mut entry.value {
                set.insert(member.to_string());
            }
        })
        .await;
    }

    pub async fn srem(&self, key: &str, member: &str) {
        self.with_map(|map| {
            if let Some(Entry {
                value: Value::Set(set),
                ..
            }) = map.get_mut(key)
            {
                set.remove(member);
            }
        })
        .await;
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        self.with_map(|map| match map.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        })
        .await
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        self.with_map(|map| {
            map.keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        self.with_map(|map| {
            keys.iter()
                .map(|k| {
                    map.get(k).and_then(|e| match &e.value {
                        Value::Str(s) => Some(s.clone()),
                        _ => None,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn incr(&self, key: &str) -> i64 {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Str("0".into()),
                expires_at: None,
            });
            if let Value::Str(s) = &mut entry.value {
                let next = s.parse::<i64>().unwrap_or(0) + 1;
                *s = next.to_string();
                next
            } else {
                0
            }
        })
        .await
    }
}

fn ttl_deadline(ttl: i64) -> Option<Instant> {
    u64::try_from(ttl)
        .ok()
        .map(|secs| Instant::now() + Duration::from_secs(secs))
}

/// Translate Redis-style start/stop (inclusive, negatives from the end) into
/// `0..len` bounds. `None` means the range selects nothing.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len_i = len as i64;
    let start = if start < 0 { (len_i + start).max(0) } else { start };
    let stop = if stop < 0 { len_i + stop } else { stop.min(len_i - 1) };
    if len == 0 || stop < 0 || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", 60).await;
        assert_eq!(kv.get("k").await, Some("v".into()));
        assert!(kv.exists("k").await);

        kv.del("k").await;
        assert_eq!(kv.get("k").await, None);
        assert!(!kv.exists("k").await);
    }

    #[tokio::test]
    async fn test_expiry_is_lazy_but_observed() {
        let kv = MemoryKv::new();
        kv.set_ex("gone", "v", 0).await;
        assert_eq!(kv.get("gone").await, None);
    }

    #[tokio::test]
    async fn test_list_push_order_and_trim() {
        let kv = MemoryKv::new();
        kv.lpush("l", "a").await;
        kv.lpush("l", "b").await;
        kv.lpush("l", "c").await;

        // Newest first, Redis LPUSH semantics
        assert_eq!(kv.lrange("l", 0, -1).await, vec!["c", "b", "a"]);
        assert_eq!(kv.lrange("l", 0, 1).await, vec!["c", "b"]);

        kv.ltrim("l", 0, 1).await;
        assert_eq!(kv.lrange("l", 0, -1).await, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_lset_in_range_and_out_of_range() {
        let kv = MemoryKv::new();
        kv.lpush("l", "a").await;
        kv.lpush("l", "b").await;

        kv.lset("l", 1, "z").await.unwrap();
        assert_eq!(kv.lrange("l", 0, -1).await, vec!["b", "z"]);

        assert!(kv.lset("l", 5, "nope").await.is_err());
        assert!(kv.lset("missing", 0, "nope").await.is_err());
    }

    #[tokio::test]
    async fn test_set_ops() {
        let kv = MemoryKv::new();
        kv.sadd("s", "x").await;
        kv.sadd("s", "x").await;
        kv.sadd("s", "y").await;

        let mut members = kv.smembers("s").await;
        members.sort();
        assert_eq!(members, vec!["x", "y"]);

        kv.srem("s", "x").await;
        assert_eq!(kv.smembers("s").await, vec!["y"]);
    }

    #[tokio::test]
    async fn test_scan_prefix_and_mget() {
        let kv = MemoryKv::new();
        kv.set_ex("room:A", "1", 60).await;
        kv.set_ex("room:B", "2", 60).await;
        kv.set_ex("chat:A", "3", 60).await;

        let mut keys = kv.scan_prefix("room:").await;
        keys.sort();
        assert_eq!(keys, vec!["room:A", "room:B"]);

        let vals = kv
            .mget(&["room:A".into(), "missing".into(), "room:B".into()])
            .await;
        assert_eq!(vals, vec![Some("1".into()), None, Some("2".into())]);
    }

    #[tokio::test]
    async fn test_incr_monotone() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("seq").await, 1);
        assert_eq!(kv.incr("seq").await, 2);
        assert_eq!(kv.incr("seq").await, 3);
    }
}
