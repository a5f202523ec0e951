//! Signaling Relay
//!
//! Routes WebRTC offers, answers, and ICE candidates between peers in a
//! room's voice or camera mesh. The server never touches media; it keeps
//! one capped peer set per (room, modality) and relays strictly targeted
//! events. Sets are process-local: deployments with multiple instances
//! must sticky-route a room's connections to one instance.

use dashmap::DashMap;
use tracing::{debug, info};

use crate::api::AppState;
use crate::error::RoomError;
use crate::events::ServerEvent;
use crate::gateway::{self, ConnId};

/// Peer mesh flavor. Independent sets, identical signaling shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Voice,
    Video,
}

impl Modality {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "videochat",
        }
    }
}

/// Payload being relayed between a pair of peers.
#[derive(Debug, Clone)]
pub enum Relay {
    Offer(String),
    Answer(String),
    Ice(serde_json::Value),
}

/// Per-(room, modality) peer sets, insertion-ordered so the existing-peers
/// snapshot is stable.
#[derive(Default)]
pub struct SignalingSets {
    sets: DashMap<(String, Modality), Vec<String>>,
}

impl SignalingSets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer, returning the members that were already present.
    /// Rejects joins that would push the set past `cap`; re-joining is a
    /// no-op that still returns the others.
    fn join(
        &self,
        room_id: &str,
        modality: Modality,
        user_id: &str,
        cap: usize,
    ) -> Result<Vec<String>, RoomError> {
        let mut set = self
            .sets
            .entry((room_id.to_string(), modality))
            .or_default();
        if set.iter().any(|u| u == user_id) {
            return Ok(set.iter().filter(|u| *u != user_id).cloned().collect());
        }
        if set.len() >= cap {
            return Err(RoomError::OverCap { cap });
        }
        let existing = set.clone();
        set.push(user_id.to_string());
        Ok(existing)
    }

    /// Remove a peer. Returns whether they were present.
    fn leave(&self, room_id: &str, modality: Modality, user_id: &str) -> bool {
        let key = (room_id.to_string(), modality);
        let Some(mut set) = self.sets.get_mut(&key) else {
            return false;
        };
        let Some(pos) = set.iter().position(|u| u == user_id) else {
            return false;
        };
        set.remove(pos);
        let empty = set.is_empty();
        drop(set);
        if empty {
            self.sets.remove(&key);
        }
        true
    }

    #[must_use]
    pub fn contains(&self, room_id: &str, modality: Modality, user_id: &str) -> bool {
        self.sets
            .get(&(room_id.to_string(), modality))
            .is_some_and(|set| set.iter().any(|u| u == user_id))
    }

    #[must_use]
    pub fn count(&self, room_id: &str, modality: Modality) -> usize {
        self.sets
            .get(&(room_id.to_string(), modality))
            .map_or(0, |set| set.len())
    }

    /// Drop both meshes for a room (room closed).
    pub fn clear_room(&self, room_id: &str) {
        self.sets.remove(&(room_id.to_string(), Modality::Voice));
        self.sets.remove(&(room_id.to_string(), Modality::Video));
    }
}

fn existing_peers(modality: Modality, user_ids: Vec<String>) -> ServerEvent {
    match modality {
        Modality::Voice => ServerEvent::VoiceExistingPeers { user_ids },
        Modality::Video => ServerEvent::VideochatExistingPeers { user_ids },
    }
}

fn peer_joined(modality: Modality, user_id: &str) -> ServerEvent {
    let user_id = user_id.to_string();
    match modality {
        Modality::Voice => ServerEvent::VoicePeerJoined { user_id },
        Modality::Video => ServerEvent::VideochatPeerJoined { user_id },
    }
}

fn peer_left(modality: Modality, user_id: &str) -> ServerEvent {
    let user_id = user_id.to_string();
    match modality {
        Modality::Voice => ServerEvent::VoicePeerLeft { user_id },
        Modality::Video => ServerEvent::VideochatPeerLeft { user_id },
    }
}

fn participant_count(modality: Modality, room_id: &str, count: usize) -> ServerEvent {
    let room_id = room_id.to_string();
    match modality {
        Modality::Voice => ServerEvent::VoiceParticipantCount { room_id, count },
        Modality::Video => ServerEvent::VideochatParticipantCount { room_id, count },
    }
}

fn relay_event(modality: Modality, from_user_id: &str, relay: Relay) -> ServerEvent {
    let from_user_id = from_user_id.to_string();
    match (modality, relay) {
        (Modality::Voice, Relay::Offer(sdp)) => {
            ServerEvent::VoiceOfferReceived { from_user_id, sdp }
        }
        (Modality::Voice, Relay::Answer(sdp)) => {
            ServerEvent::VoiceAnswerReceived { from_user_id, sdp }
        }
        (Modality::Voice, Relay::Ice(candidate)) => ServerEvent::VoiceIceCandidateReceived {
            from_user_id,
            candidate,
        },
        (Modality::Video, Relay::Offer(sdp)) => {
            ServerEvent::VideochatOfferReceived { from_user_id, sdp }
        }
        (Modality::Video, Relay::Answer(sdp)) => {
            ServerEvent::VideochatAnswerReceived { from_user_id, sdp }
        }
        (Modality::Video, Relay::Ice(candidate)) => ServerEvent::VideochatIceCandidateReceived {
            from_user_id,
            candidate,
        },
    }
}

/// Join a room's peer mesh.
pub async fn handle_join(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    modality: Modality,
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

    let existing = state
        .signals
        .join(room_id, modality, &user_id, state.config.signal_cap)?;

    info!(
        room_id,
        %user_id,
        modality = modality.label(),
        peers = existing.len() + 1,
        "Peer joined mesh"
    );

    state
        .registry
        .send(conn_id, existing_peers(modality, existing.clone()))
        .await;
    for peer in &existing {
        gateway::emit_to_user(state, peer, peer_joined(modality, &user_id)).await;
    }

    let count = state.signals.count(room_id, modality);
    gateway::emit_to_room(state, &room, &participant_count(modality, room_id, count)).await;
    Ok(())
}

/// Leave a room's peer mesh.
pub async fn handle_leave(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    modality: Modality,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;
    depart(state, &user_id, room_id, modality).await;
    Ok(())
}

/// Relay an offer/answer/candidate to exactly one peer. Senders or targets
/// outside the mesh are dropped silently; signaling races are routine.
pub async fn handle_relay(
    state: &AppState,
    conn_id: ConnId,
    room_id: &str,
    modality: Modality,
    target_user_id: &str,
    relay: Relay,
) -> Result<(), RoomError> {
    let (user_id, _) = gateway::bound_identity(state, conn_id, room_id)?;

    if !state.signals.contains(room_id, modality, &user_id)
        || !state.signals.contains(room_id, modality, target_user_id)
    {
        debug!(
            room_id,
            from = %user_id,
            to = target_user_id,
            modality = modality.label(),
            "Dropping relay outside mesh"
        );
        return Ok(());
    }

    gateway::emit_to_user(state, target_user_id, relay_event(modality, &user_id, relay)).await;
    Ok(())
}

/// Remove a departing user from both meshes and notify the room.
pub async fn handle_disconnect(state: &AppState, user_id: &str, room_id: &str) {
    for modality in [Modality::Voice, Modality::Video] {
        depart(state, user_id, room_id, modality).await;
    }
}

async fn depart(state: &AppState, user_id: &str, room_id: &str, modality: Modality) {
    if !state.signals.leave(room_id, modality, user_id) {
        return;
    }

    info!(
        room_id,
        user_id,
        modality = modality.label(),
        "Peer left mesh"
    );

    // The room may already be gone (closed by its host); peers learned
    // about that through host-left, so a missing record just skips fan-out.
    if let Ok(Some(room)) = state.rooms.get(room_id).await {
        gateway::emit_to_room(state, &room, &peer_left(modality, user_id)).await;
        let count = state.signals.count(room_id, modality);
        gateway::emit_to_room(state, &room, &participant_count(modality, room_id, count)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_returns_existing_and_caps() {
        let sets = SignalingSets::new();

        assert_eq!(sets.join("R", Modality::Voice, "u1", 3).unwrap(), Vec::<String>::new());
        assert_eq!(sets.join("R", Modality::Voice, "u2", 3).unwrap(), vec!["u1"]);
        assert_eq!(
            sets.join("R", Modality::Voice, "u3", 3).unwrap(),
            vec!["u1", "u2"]
        );

        // At cap: the set must not grow
        assert!(matches!(
            sets.join("R", Modality::Voice, "u4", 3),
            Err(RoomError::OverCap { cap: 3 })
        ));
        assert_eq!(sets.count("R", Modality::Voice), 3);
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let sets = SignalingSets::new();
        sets.join("R", Modality::Voice, "u1", 5).unwrap();
        sets.join("R", Modality::Voice, "u2", 5).unwrap();

        let existing = sets.join("R", Modality::Voice, "u1", 5).unwrap();
        assert_eq!(existing, vec!["u2"]);
        assert_eq!(sets.count("R", Modality::Voice), 2);
    }

    #[test]
    fn test_modalities_are_independent() {
        let sets = SignalingSets::new();
        sets.join("R", Modality::Voice, "u1", 1).unwrap();

        // Voice being full must not block the camera mesh
        assert!(sets.join("R", Modality::Video, "u2", 1).is_ok());
        assert!(sets.contains("R", Modality::Voice, "u1"));
        assert!(sets.contains("R", Modality::Video, "u2"));
        assert!(!sets.contains("R", Modality::Video, "u1"));
    }

    #[test]
    fn test_leave_and_clear() {
        let sets = SignalingSets::new();
        sets.join("R", Modality::Voice, "u1", 5).unwrap();
        sets.join("R", Modality::Video, "u1", 5).unwrap();

        assert!(sets.leave("R", Modality::Voice, "u1"));
        assert!(!sets.leave("R", Modality::Voice, "u1"));
        assert_eq!(sets.count("R", Modality::Voice), 0);

        sets.clear_room("R");
        assert_eq!(sets.count("R", Modality::Video), 0);
    }
}
