//! Connection Registry
//!
//! Live connections on this instance: one outbound queue per connection
//! plus the identity the connection acquired when it entered a room. Every
//! event for a given recipient goes through the same queue, which is what
//! preserves per-recipient ordering.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::ServerEvent;

/// Per-connection id, minted at upgrade time.
pub type ConnId = Uuid;

/// Frames the per-connection sender task writes to the socket.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    /// Liveness probe after an idle period.
    Ping,
    /// Server-initiated close (kicks, shutdown).
    Close,
}

#[derive(Debug)]
struct ConnHandle {
    tx: mpsc::Sender<Outbound>,
    user_id: Option<String>,
    room_id: Option<String>,
}

/// Registry of live connections on this instance.
#[derive(Default)]
pub struct Registry {
    conns: DashMap<ConnId, ConnHandle>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn_id: ConnId, tx: mpsc::Sender<Outbound>) {
        self.conns.insert(
            conn_id,
            ConnHandle {
                tx,
                user_id: None,
                room_id: None,
            },
        );
    }

    /// Attach a room identity to a connection.
    pub fn bind(&self, conn_id: ConnId, user_id: &str, room_id: &str) {
        if let Some(mut handle) = self.conns.get_mut(&conn_id) {
            handle.user_id = Some(user_id.to_string());
            handle.room_id = Some(room_id.to_string());
        }
    }

    /// Detach the identity but keep the connection.
    pub fn clear_binding(&self, conn_id: ConnId) {
        if let Some(mut handle) = self.conns.get_mut(&conn_id) {
            handle.user_id = None;
            handle.room_id = None;
        }
    }

    /// The `(user_id, room_id)` a connection is bound to, if any.
    #[must_use]
    pub fn identity(&self, conn_id: ConnId) -> Option<(String, String)> {
        let handle = self.conns.get(&conn_id)?;
        match (&handle.user_id, &handle.room_id) {
            (Some(user), Some(room)) => Some((user.clone(), room.clone())),
            _ => None,
        }
    }

    /// Drop a connection, returning the identity it held.
    pub fn unregister(&self, conn_id: ConnId) -> Option<(String, String)> {
        let (_, handle) = self.conns.remove(&conn_id)?;
        match (handle.user_id, handle.room_id) {
            (Some(user), Some(room)) => Some((user, room)),
            _ => None,
        }
    }

    /// Whether a connection id (as stored in the identity map) is live here.
    #[must_use]
    pub fn is_live(&self, conn_id: &str) -> bool {
        Uuid::parse_str(conn_id).is_ok_and(|id| self.conns.contains_key(&id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    async fn push(&self, conn_id: ConnId, frame: Outbound) -> bool {
        // Clone the sender out so no map guard is held across the await.
        let tx = match self.conns.get(&conn_id) {
            Some(handle) => handle.tx.clone(),
            None => return false,
        };
        tx.send(frame).await.is_ok()
    }

    /// Queue an event for a connection. `false` when the connection is gone.
    pub async fn send(&self, conn_id: ConnId, event: ServerEvent) -> bool {
        self.push(conn_id, Outbound::Event(event)).await
    }

    /// Queue an event by the string id stored in the identity map.
    pub async fn send_str(&self, conn_id: &str, event: ServerEvent) -> bool {
        match Uuid::parse_str(conn_id) {
            Ok(id) => self.send(id, event).await,
            Err(_) => false,
        }
    }

    pub async fn ping(&self, conn_id: ConnId) -> bool {
        self.push(conn_id, Outbound::Ping).await
    }

    /// Ask the sender task to close the socket.
    pub async fn close(&self, conn_id: ConnId) -> bool {
        self.push(conn_id, Outbound::Close).await
    }

    pub async fn close_str(&self, conn_id: &str) -> bool {
        match Uuid::parse_str(conn_id) {
            Ok(id) => self.close(id).await,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn event() -> ServerEvent {
        ServerEvent::UserLeft {
            user_id: "u1".into(),
        }
    }

    #[tokio::test]
    async fn test_register_send_unregister() {
        let registry = Registry::new();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);

        registry.register(conn, tx);
        assert!(registry.send(conn, event()).await);
        assert!(matches!(rx.recv().await, Some(Outbound::Event(_))));

        registry.unregister(conn);
        assert!(!registry.send(conn, event()).await);
    }

    #[tokio::test]
    async fn test_bind_and_identity() {
        let registry = Registry::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(conn, tx);

        assert!(registry.identity(conn).is_none());

        registry.bind(conn, "u1", "ABC123");
        assert_eq!(
            registry.identity(conn),
            Some(("u1".to_string(), "ABC123".to_string()))
        );

        let identity = registry.unregister(conn);
        assert_eq!(identity, Some(("u1".to_string(), "ABC123".to_string())));
    }

    #[tokio::test]
    async fn test_send_str_rejects_garbage_ids() {
        let registry = Registry::new();
        assert!(
            !registry
                .send_str(
                    "not-a-uuid",
                    ServerEvent::RoomError {
                        error: "x".into(),
                        code: ErrorCode::Internal,
                    }
                )
                .await
        );
    }
}
