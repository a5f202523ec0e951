//! Shared utility functions

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Character set for room codes: uppercase alphanumerics.
const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a 6-character room code for sharing.
///
/// # Examples
///
/// ```
/// use wp_server::util::generate_room_code;
///
/// let code = generate_room_code();
/// assert_eq!(code.len(), 6);
/// assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
/// ```
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ROOM_CODE_CHARS[rng.gen_range(0..ROOM_CODE_CHARS.len())] as char)
        .collect()
}

/// Generate an unguessable host token (48 hex chars, 192 bits).
pub fn generate_host_token() -> String {
    let mut rng = rand::thread_rng();
    (0..24)
        .map(|_| format!("{:02x}", rng.gen::<u8>()))
        .collect()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Truncate a string to at most `max` characters on a char boundary.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Keyed advisory locks.
///
/// One async mutex per string key, created on demand. Held only for the
/// duration of a single read-modify-write; callers must release before
/// fanning out.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating it if needed.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for `key`. Safe to call while the lock is held
    /// elsewhere; the Arc keeps it alive until the guard drops.
    pub fn discard(&self, key: &str) {
        self.locks.remove(key);
    }
}
