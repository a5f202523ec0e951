//! Inbound payload validation.
//!
//! Field-level rules applied by the dispatcher before any event reaches a
//! coordinator. Failures surface as `validation-failed` with a user-safe
//! message; nothing downstream re-checks these.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use super::ClientEvent;
use crate::error::RoomError;

/// Maximum chat message length after trimming.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Maximum emoji length (grapheme clusters with ZWJ sequences stay short).
pub const MAX_EMOJI_LEN: usize = 16;

/// Maximum SDP blob size the relay will forward.
pub const MAX_SDP_LEN: usize = 256 * 1024;

lazy_static! {
    static ref ROOM_ID: Regex = Regex::new(r"^[A-Z0-9]{6}$").unwrap();
    static ref USER_NAME: Regex = Regex::new(r"^[a-zA-Z0-9 \-_.!?]{2,20}$").unwrap();
}

#[must_use]
pub fn is_valid_room_id(room_id: &str) -> bool {
    ROOM_ID.is_match(room_id)
}

#[must_use]
pub fn is_valid_user_name(name: &str) -> bool {
    USER_NAME.is_match(name)
}

#[must_use]
pub fn is_valid_video_url(raw: &str) -> bool {
    Url::parse(raw).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
    })
}

fn is_valid_message(text: &str) -> bool {
    let len = text.trim().chars().count();
    (1..=MAX_MESSAGE_LEN).contains(&len)
}

fn is_valid_emoji(emoji: &str) -> bool {
    let len = emoji.chars().count();
    (1..=MAX_EMOJI_LEN).contains(&len)
        && !emoji.chars().any(|c| c.is_control() || c.is_whitespace())
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && !id.chars().any(char::is_control)
}

fn is_valid_time(t: f64) -> bool {
    t.is_finite() && t >= 0.0
}

fn fail(msg: &str) -> Result<(), RoomError> {
    Err(RoomError::ValidationFailed(msg.to_string()))
}

fn check_room_id(room_id: &str) -> Result<(), RoomError> {
    if is_valid_room_id(room_id) {
        Ok(())
    } else {
        fail("Room code must be 6 uppercase letters or digits")
    }
}

fn check_user_name(name: &str) -> Result<(), RoomError> {
    if is_valid_user_name(name) {
        Ok(())
    } else {
        fail("Names are 2-20 letters, digits, spaces, or -_.!?")
    }
}

fn check_target(id: &str) -> Result<(), RoomError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        fail("Invalid target user id")
    }
}

fn check_time(t: f64) -> Result<(), RoomError> {
    if is_valid_time(t) {
        Ok(())
    } else {
        fail("Playback position must be a non-negative number")
    }
}

fn check_sdp(sdp: &str) -> Result<(), RoomError> {
    if !sdp.is_empty() && sdp.len() <= MAX_SDP_LEN {
        Ok(())
    } else {
        fail("Invalid session description")
    }
}

/// Validate an inbound event against the wire rules.
pub fn validate(event: &ClientEvent) -> Result<(), RoomError> {
    match event {
        ClientEvent::CreateRoom { host_name } => check_user_name(host_name),

        ClientEvent::JoinRoom {
            room_id, user_name, ..
        } => {
            check_room_id(room_id)?;
            check_user_name(user_name)
        }

        ClientEvent::LeaveRoom { room_id }
        | ClientEvent::TypingStart { room_id }
        | ClientEvent::TypingStop { room_id }
        | ClientEvent::VoiceJoin { room_id }
        | ClientEvent::VoiceLeave { room_id }
        | ClientEvent::VideochatJoin { room_id }
        | ClientEvent::VideochatLeave { room_id } => check_room_id(room_id),

        ClientEvent::KickUser { room_id, user_id }
        | ClientEvent::PromoteHost { room_id, user_id } => {
            check_room_id(room_id)?;
            check_target(user_id)
        }

        ClientEvent::SetVideo { room_id, video_url } => {
            check_room_id(room_id)?;
            if is_valid_video_url(video_url) {
                Ok(())
            } else {
                fail("Video URL must be an absolute http(s) URL")
            }
        }

        ClientEvent::PlayVideo {
            room_id,
            current_time,
        }
        | ClientEvent::PauseVideo {
            room_id,
            current_time,
        }
        | ClientEvent::SeekVideo {
            room_id,
            current_time,
        } => {
            check_room_id(room_id)?;
            check_time(*current_time)
        }

        ClientEvent::SyncCheck {
            room_id,
            current_time,
            timestamp,
            ..
        } => {
            check_room_id(room_id)?;
            check_time(*current_time)?;
            if *timestamp >= 0 {
                Ok(())
            } else {
                fail("Invalid timestamp")
            }
        }

        ClientEvent::VideoErrorReport {
            room_id,
            current_time,
            ..
        } => {
            check_room_id(room_id)?;
            if let Some(t) = current_time {
                check_time(*t)?;
            }
            Ok(())
        }

        ClientEvent::SendMessage {
            room_id,
            message,
            reply_to,
        } => {
            check_room_id(room_id)?;
            if !is_valid_message(message) {
                return fail("Messages are 1-1000 characters");
            }
            if let Some(reply) = reply_to {
                if !is_valid_id(&reply.message_id) {
                    return fail("Invalid reply reference");
                }
            }
            Ok(())
        }

        ClientEvent::ToggleReaction {
            room_id,
            message_id,
            emoji,
        } => {
            check_room_id(room_id)?;
            if !is_valid_id(message_id) {
                return fail("Invalid message id");
            }
            if is_valid_emoji(emoji) {
                Ok(())
            } else {
                fail("Invalid emoji")
            }
        }

        ClientEvent::VoiceOffer {
            room_id,
            target_user_id,
            sdp,
        }
        | ClientEvent::VoiceAnswer {
            room_id,
            target_user_id,
            sdp,
        }
        | ClientEvent::VideochatOffer {
            room_id,
            target_user_id,
            sdp,
        }
        | ClientEvent::VideochatAnswer {
            room_id,
            target_user_id,
            sdp,
        } => {
            check_room_id(room_id)?;
            check_target(target_user_id)?;
            check_sdp(sdp)
        }

        ClientEvent::VoiceIceCandidate {
            room_id,
            target_user_id,
            candidate,
        }
        | ClientEvent::VideochatIceCandidate {
            room_id,
            target_user_id,
            candidate,
        } => {
            check_room_id(room_id)?;
            check_target(target_user_id)?;
            if candidate.is_null() {
                fail("Missing ICE candidate")
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_rules() {
        assert!(is_valid_room_id("ABC123"));
        assert!(is_valid_room_id("ZZZZZZ"));
        assert!(!is_valid_room_id("abc123"));
        assert!(!is_valid_room_id("ABC12"));
        assert!(!is_valid_room_id("ABC1234"));
        assert!(!is_valid_room_id("ABC-12"));
        assert!(!is_valid_room_id(""));
    }

    #[test]
    fn test_user_name_rules() {
        assert!(is_valid_user_name("Bob"));
        assert!(is_valid_user_name("Alice W."));
        assert!(is_valid_user_name("what?!"));
        assert!(is_valid_user_name("a-b_c"));
        assert!(!is_valid_user_name("x"));
        assert!(!is_valid_user_name(&"x".repeat(21)));
        assert!(!is_valid_user_name("nope\n"));
        assert!(!is_valid_user_name("<script>"));
        assert!(!is_valid_user_name("émile"));
    }

    #[test]
    fn test_video_url_rules() {
        assert!(is_valid_video_url("https://example.com/movie.mp4"));
        assert!(is_valid_video_url("http://example.com/live.m3u8?tok=1"));
        assert!(!is_valid_video_url("ftp://example.com/movie.mp4"));
        assert!(!is_valid_video_url("/relative/path.mp4"));
        assert!(!is_valid_video_url("not a url"));
        assert!(!is_valid_video_url("javascript:alert(1)"));
    }

    #[test]
    fn test_message_bounds() {
        let ok = ClientEvent::SendMessage {
            room_id: "ABC123".into(),
            message: "hi".into(),
            reply_to: None,
        };
        assert!(validate(&ok).is_ok());

        let padded = ClientEvent::SendMessage {
            room_id: "ABC123".into(),
            message: "   ".into(),
            reply_to: None,
        };
        assert!(validate(&padded).is_err());

        let long = ClientEvent::SendMessage {
            room_id: "ABC123".into(),
            message: "x".repeat(MAX_MESSAGE_LEN + 1),
            reply_to: None,
        };
        assert!(validate(&long).is_err());
    }

    #[test]
    fn test_emoji_rules() {
        let event = |emoji: &str| ClientEvent::ToggleReaction {
            room_id: "ABC123".into(),
            message_id: "1".into(),
            emoji: emoji.into(),
        };
        assert!(validate(&event("👍")).is_ok());
        assert!(validate(&event("👩‍💻")).is_ok());
        assert!(validate(&event("")).is_err());
        assert!(validate(&event("a b")).is_err());
        assert!(validate(&event(&"🔥".repeat(20))).is_err());
    }

    #[test]
    fn test_playback_time_rules() {
        let play = |t: f64| ClientEvent::PlayVideo {
            room_id: "ABC123".into(),
            current_time: t,
        };
        assert!(validate(&play(0.0)).is_ok());
        assert!(validate(&play(4321.5)).is_ok());
        assert!(validate(&play(-1.0)).is_err());
        assert!(validate(&play(f64::NAN)).is_err());
        assert!(validate(&play(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_create_room_name_is_checked() {
        assert!(validate(&ClientEvent::CreateRoom {
            host_name: "Alice".into()
        })
        .is_ok());
        assert!(validate(&ClientEvent::CreateRoom {
            host_name: "A".into()
        })
        .is_err());
    }
}
