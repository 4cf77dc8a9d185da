//! Domain events
//!
//! Everything the presentation layer learns about the channel arrives as a
//! [`ChannelEvent`]. Uses Serde's tagged enum so a consumer on the other
//! side of a pipe can decode them as JSON.

use serde::Serialize;

use crate::channel::ChannelSnapshot;
use crate::types::ClientId;

/// Conversation a text message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Private,
    Channel,
    Whisper,
}

impl MessageKind {
    /// Map a `targetmode` value; whispers never arrive this way
    pub fn from_target_mode(mode: &str) -> Option<Self> {
        match mode {
            "1" => Some(MessageKind::Private),
            "2" => Some(MessageKind::Channel),
            _ => None,
        }
    }
}

/// Core → presentation layer event
///
/// Fire-and-forget and ordered. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Roster snapshot replaced
    RosterChanged { snapshot: ChannelSnapshot },
    /// Text or whisper message received
    Message {
        sender: String,
        text: String,
        kind: MessageKind,
        /// Client id of the sender, or the sender name when no id is known
        origin: String,
    },
    /// A client entered my channel
    MemberJoined { clid: ClientId, name: String },
    /// A client left my channel
    MemberLeft { clid: ClientId, name: String },
    /// A client moved from my channel to another one
    MemberMoved { clid: ClientId, name: String },
    /// A client started whispering to me with no session open
    WhisperOpened { clid: ClientId, name: String },
    /// Whisper talk state of a client changed
    WhisperTalk { clid: ClientId, talking: bool },
    /// Whisper session with a client is over
    WhisperClosed { clid: ClientId },
    /// A background lookup found the name of a whispering client
    NameResolved { clid: ClientId, name: String },
    /// I moved to another channel (or reconnected)
    ChannelChanged,
    /// Connectivity status line
    Status { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_mode_mapping() {
        assert_eq!(MessageKind::from_target_mode("1"), Some(MessageKind::Private));
        assert_eq!(MessageKind::from_target_mode("2"), Some(MessageKind::Channel));
        assert_eq!(MessageKind::from_target_mode("3"), None);
    }

    #[test]
    fn test_event_serialize() {
        let event = ChannelEvent::MemberJoined {
            clid: ClientId::from("5"),
            name: "Ana".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"member_joined\""));
        assert!(json.contains("\"clid\":\"5\""));
    }

    #[test]
    fn test_message_kind_serialize() {
        let event = ChannelEvent::Message {
            sender: "Ana".into(),
            text: "hi".into(),
            kind: MessageKind::Whisper,
            origin: "5".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"whisper\""));
    }

    #[test]
    fn test_unit_variant_serialize() {
        let json = serde_json::to_string(&ChannelEvent::ChannelChanged).unwrap();
        assert_eq!(json, "{\"type\":\"channel_changed\"}");
    }
}
