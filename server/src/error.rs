//! Domain Errors
//!
//! Every failure the coordination core surfaces to a client maps to one of
//! these kinds. The gateway dispatcher is the single place where they are
//! translated into outbound error events; messages are user-safe by
//! construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the room, playback, chat, and signaling coordinators.
#[derive(Debug, Error)]
pub enum RoomError {
    /// No room exists under the supplied id.
    #[error("Room not found")]
    RoomNotFound,

    /// A host identity was claimed without the matching host token.
    #[error("Invalid host credentials")]
    InvalidHostCredentials,

    /// The operation requires host privileges.
    #[error("This action requires host privileges")]
    HostOnly,

    /// The signaling modality is at its participant cap.
    #[error("Call is full (max {cap} participants)")]
    OverCap {
        /// Participant cap for the modality.
        cap: usize,
    },

    /// An inbound payload failed validation.
    #[error("{0}")]
    ValidationFailed(String),

    /// The display name is in use by a connected member.
    #[error("That name is already taken")]
    NameTaken,

    /// The connection has not joined a room yet.
    #[error("Join a room first")]
    NotAuthenticated,

    /// The targeted user is not a member of the room.
    #[error("That user is not in the room")]
    TargetNotInRoom,

    /// The room was closed because its host left.
    #[error("The host left, so the room was closed")]
    HostLeft,

    /// Unrecoverable store or relay failure. The detail is logged, never
    /// sent to clients.
    #[error("Internal server error")]
    Internal(String),
}

impl RoomError {
    /// Stable wire code for this error kind.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound => ErrorCode::RoomNotFound,
            Self::InvalidHostCredentials => ErrorCode::InvalidHostCredentials,
            Self::HostOnly => ErrorCode::HostOnly,
            Self::OverCap { .. } => ErrorCode::OverCap,
            Self::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Self::NameTaken => ErrorCode::NameTaken,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::TargetNotInRoom => ErrorCode::TargetNotInRoom,
            Self::HostLeft => ErrorCode::HostLeft,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Wire-stable error codes carried on `room-error` and `*-error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    RoomNotFound,
    InvalidHostCredentials,
    HostOnly,
    OverCap,
    ValidationFailed,
    NameTaken,
    NotAuthenticated,
    TargetNotInRoom,
    HostLeft,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_kebab_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::RoomNotFound).unwrap(),
            "\"room-not-found\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::InvalidHostCredentials).unwrap(),
            "\"invalid-host-credentials\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::HostOnly).unwrap(),
            "\"host-only\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::OverCap).unwrap(),
            "\"over-cap\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::HostLeft).unwrap(),
            "\"host-left\""
        );
    }

    #[test]
    fn test_internal_error_message_is_safe() {
        let err = RoomError::Internal("redis timed out at 10.0.0.3:6379".into());
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            RoomError::OverCap { cap: 5 }.code(),
            ErrorCode::OverCap
        );
        assert_eq!(
            RoomError::ValidationFailed("bad".into()).code(),
            ErrorCode::ValidationFailed
        );
    }
}
