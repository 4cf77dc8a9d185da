//! Channel state store
//!
//! Thread-safe view of "who is in my channel right now". Readers get an
//! owned [`ChannelSnapshot`]; writers go through the named mutators, each
//! of which takes the lock once.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::client::{ClientEntry, ClientUpdate};
use crate::types::{ChannelId, ClientId};

/// Immutable copy of the channel state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// Members of my channel, ordered by client id
    pub members: Vec<ClientEntry>,
    pub channel_name: String,
    pub server_name: String,
    /// Channel group id to group name
    pub group_names: HashMap<String, String>,
    pub my_channel_id: ChannelId,
}

#[derive(Debug, Default)]
struct Inner {
    my_client_id: ClientId,
    my_channel_id: ChannelId,
    channel_name: String,
    server_name: String,
    group_names: HashMap<String, String>,
    /// Only clients sharing my channel
    clients: BTreeMap<ClientId, ClientEntry>,
}

/// Per-session channel state
#[derive(Debug, Default)]
pub struct ChannelState {
    inner: Mutex<Inner>,
}

impl ChannelState {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy out the current state
    pub fn snapshot(&self) -> ChannelSnapshot {
        let inner = self.lock();
        ChannelSnapshot {
            members: inner.clients.values().cloned().collect(),
            channel_name: inner.channel_name.clone(),
            server_name: inner.server_name.clone(),
            group_names: inner.group_names.clone(),
            my_channel_id: inner.my_channel_id.clone(),
        }
    }

    /// Record my identity and location; clears the membership
    pub fn set_me(
        &self,
        my_client_id: ClientId,
        my_channel_id: ChannelId,
        channel_name: String,
        server_name: String,
    ) {
        let mut inner = self.lock();
        inner.my_client_id = my_client_id;
        inner.my_channel_id = my_channel_id;
        inner.channel_name = channel_name;
        inner.server_name = server_name;
        inner.clients.clear();
    }

    /// Replace the channel group names
    pub fn set_group_names(&self, group_names: HashMap<String, String>) {
        self.lock().group_names = group_names;
    }

    /// Replace the whole membership
    pub fn set_roster(&self, entries: impl IntoIterator<Item = ClientEntry>) {
        let clients = entries
            .into_iter()
            .map(|entry| (entry.clid.clone(), entry))
            .collect();
        self.lock().clients = clients;
    }

    /// Merge into an existing entry, or insert a partial one
    pub fn upsert(&self, clid: &ClientId, update: &ClientUpdate) {
        let mut inner = self.lock();
        let my_channel = inner.my_channel_id.clone();
        inner
            .clients
            .entry(clid.clone())
            .or_insert_with(|| ClientEntry::new(clid.clone(), my_channel))
            .apply(update);
    }

    /// Remove a member, returning it if it was tracked
    pub fn remove(&self, clid: &ClientId) -> Option<ClientEntry> {
        self.lock().clients.remove(clid)
    }

    /// Set talking status of a tracked member
    pub fn set_talking(&self, clid: &ClientId, talking: bool) {
        if let Some(entry) = self.lock().clients.get_mut(clid) {
            entry.talking = talking;
        }
    }

    /// Set whisper talking status of a tracked member
    pub fn set_whisper_talking(&self, clid: &ClientId, talking: bool) {
        if let Some(entry) = self.lock().clients.get_mut(clid) {
            entry.whisper_talking = talking;
        }
    }

    /// Check if a client is tracked in my channel
    pub fn has(&self, clid: &ClientId) -> bool {
        self.lock().clients.contains_key(clid)
    }

    /// Get a copy of a tracked member
    pub fn get(&self, clid: &ClientId) -> Option<ClientEntry> {
        self.lock().clients.get(clid).cloned()
    }

    /// Get my own client id
    pub fn my_client_id(&self) -> ClientId {
        self.lock().my_client_id.clone()
    }

    /// Get the channel I sit in
    pub fn my_channel_id(&self) -> ChannelId {
        self.lock().my_channel_id.clone()
    }
}
