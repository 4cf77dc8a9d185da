//! Roster member definition
//!
//! Represents one client sitting in my channel, along with the partial
//! updates that notifications carry.

use serde::Serialize;

use crate::codec::Entity;
use crate::types::{ChannelId, ClientId};

/// One roster member
///
/// Holds the identity, display name and voice state of a client that
/// shares my channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEntry {
    /// Wire client id
    pub clid: ClientId,
    /// Display name (may be empty until resolved)
    pub nickname: String,
    /// Channel the client currently sits in
    pub channel_id: ChannelId,
    /// Currently transmitting voice
    pub talking: bool,
    /// Currently whispering to me
    pub whisper_talking: bool,
    /// Microphone muted
    pub input_muted: bool,
    /// Speakers muted
    pub output_muted: bool,
    /// Channel group, looked up in the snapshot's group names
    pub channel_group_id: Option<String>,
}

impl ClientEntry {
    /// Create an entry with nothing known but its ids
    pub fn new(clid: ClientId, channel_id: ChannelId) -> Self {
        Self {
            clid,
            nickname: String::new(),
            channel_id,
            talking: false,
            whisper_talking: false,
            input_muted: false,
            output_muted: false,
            channel_group_id: None,
        }
    }

    /// Build an entry from a `clientlist` entity; `None` without a `clid`
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        let clid = entity.get("clid").filter(|id| !id.is_empty())?;
        let mut entry = Self::new(ClientId::from(clid), ChannelId::from(entity.value("cid")));
        entry.apply(&ClientUpdate::from_entity(entity));
        Some(entry)
    }

    /// Merge every field the update carries
    pub fn apply(&mut self, update: &ClientUpdate) {
        if let Some(nickname) = &update.nickname {
            self.nickname = nickname.clone();
        }
        if let Some(channel_id) = &update.channel_id {
            self.channel_id = channel_id.clone();
        }
        if let Some(talking) = update.talking {
            self.talking = talking;
        }
        if let Some(input_muted) = update.input_muted {
            self.input_muted = input_muted;
        }
        if let Some(output_muted) = update.output_muted {
            self.output_muted = output_muted;
        }
        if let Some(group) = &update.channel_group_id {
            self.channel_group_id = Some(group.clone());
        }
    }

    /// Get the display name, falling back to the placeholder
    pub fn display_name(&self) -> String {
        if self.nickname.is_empty() {
            self.clid.placeholder_name()
        } else {
            self.nickname.clone()
        }
    }
}

/// Partial field set merged into a [`ClientEntry`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientUpdate {
    pub nickname: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub talking: Option<bool>,
    pub input_muted: Option<bool>,
    pub output_muted: Option<bool>,
    pub channel_group_id: Option<String>,
}

impl ClientUpdate {
    /// Every known field present on the entity
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            channel_id: entity.get("cid").map(ChannelId::from),
            channel_group_id: entity.get("client_channel_group_id").map(str::to_string),
            ..Self::allow_listed(entity)
        }
    }

    /// Only the fields a `notifyclientupdated` may change
    pub fn allow_listed(entity: &Entity) -> Self {
        Self {
            nickname: entity.get("client_nickname").map(str::to_string),
            talking: entity.flag("client_flag_talking"),
            input_muted: entity.flag("client_input_muted"),
            output_muted: entity.flag("client_output_muted"),
            ..Self::default()
        }
    }

    /// Check if the update carries nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_entity;

    #[test]
    fn test_entry_from_clientlist_entity() {
        let e = parse_entity(
            "clid=5 cid=1 client_nickname=Ana\\sB client_flag_talking=0 client_input_muted=1 \
             client_output_muted=0 client_channel_group_id=8",
        );
        let entry = ClientEntry::from_entity(&e).unwrap();

        assert_eq!(entry.clid, ClientId::from("5"));
        assert_eq!(entry.channel_id, ChannelId::from("1"));
        assert_eq!(entry.nickname, "Ana B");
        assert!(entry.input_muted);
        assert!(!entry.talking);
        assert_eq!(entry.channel_group_id.as_deref(), Some("8"));
    }

    #[test]
    fn test_entry_requires_clid() {
        assert!(ClientEntry::from_entity(&parse_entity("cid=1 client_nickname=x")).is_none());
    }

    #[test]
    fn test_allow_list_ignores_other_fields() {
        let e = parse_entity("clid=5 cid=9 client_away=1 client_input_muted=1");
        let update = ClientUpdate::allow_listed(&e);
        assert_eq!(update.input_muted, Some(true));
        assert!(update.channel_id.is_none());
        assert!(update.nickname.is_none());

        assert!(ClientUpdate::allow_listed(&parse_entity("clid=5 client_away=1")).is_empty());
    }

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut entry = ClientEntry::new(ClientId::from("5"), ChannelId::from("1"));
        entry.nickname = "Ana".into();
        entry.apply(&ClientUpdate {
            output_muted: Some(true),
            ..ClientUpdate::default()
        });
        assert_eq!(entry.nickname, "Ana");
        assert!(entry.output_muted);
    }

    #[test]
    fn test_display_name_placeholder() {
        let entry = ClientEntry::new(ClientId::from("12345"), ChannelId::from("1"));
        assert_eq!(entry.display_name(), "User-2345");
    }
}
