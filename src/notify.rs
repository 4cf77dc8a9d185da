//! Notification records
//!
//! Classifies pushed records by their leading `notify*` tag and parses their
//! entities. A record may batch several entities (`clid=5|clid=6`); later
//! entities inherit the fields they omit from the first one.

use crate::codec::{self, Entity};

/// Notification classes the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    TalkStatusChange,
    ClientMoved,
    ClientEnterView,
    ClientLeftView,
    ConnectStatusChange,
    ClientUpdated,
    TextMessage,
    Whisper,
}

impl NotifyKind {
    /// Classes registered at the start of every session
    pub const SUBSCRIBED: &'static [NotifyKind] = &[
        NotifyKind::TalkStatusChange,
        NotifyKind::ClientMoved,
        NotifyKind::ClientEnterView,
        NotifyKind::ClientLeftView,
        NotifyKind::ConnectStatusChange,
        NotifyKind::ClientUpdated,
        NotifyKind::TextMessage,
        NotifyKind::Whisper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::TalkStatusChange => "notifytalkstatuschange",
            NotifyKind::ClientMoved => "notifyclientmoved",
            NotifyKind::ClientEnterView => "notifycliententerview",
            NotifyKind::ClientLeftView => "notifyclientleftview",
            NotifyKind::ConnectStatusChange => "notifyconnectstatuschange",
            NotifyKind::ClientUpdated => "notifyclientupdated",
            NotifyKind::TextMessage => "notifytextmessage",
            NotifyKind::Whisper => "notifywhisper",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::SUBSCRIBED.iter().copied().find(|k| k.as_str() == tag)
    }
}

/// A parsed notification record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotifyKind,
    pub entities: Vec<Entity>,
}

impl Notification {
    /// Parse a record; `None` for anything that is not a known notification
    pub fn parse(line: &str) -> Option<Self> {
        let (tag, body) = line.split_once(' ').unwrap_or((line, ""));
        let kind = NotifyKind::from_tag(tag)?;

        let mut entities = codec::parse_record(body);
        if let Some((first, rest)) = entities.split_first_mut() {
            for entity in rest {
                entity.inherit(first);
            }
        }
        Some(Self { kind, entities })
    }
}
