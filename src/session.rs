//! Per-connection reconciliation
//!
//! A `Session` lives from a successful authentication until the connection
//! drops. It bootstraps the channel state, then folds each notification
//! record into the store and emits the matching domain events.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, trace};

use crate::channel::ChannelState;
use crate::client::{ClientEntry, ClientUpdate};
use crate::codec::Entity;
use crate::error::{ClientQueryError, Result};
use crate::message::{ChannelEvent, MessageKind};
use crate::nickname::{is_placeholder, NicknameResolver};
use crate::notify::{Notification, NotifyKind};
use crate::query::QueryClient;
use crate::types::{ChannelId, ClientId};

/// Sender name used when a whisper carries neither a name nor an id
const ANONYMOUS_WHISPER: &str = "Whisper";

fn client_id(entity: &Entity) -> Option<ClientId> {
    entity
        .get("clid")
        .filter(|id| !id.is_empty())
        .map(ClientId::from)
}

pub struct Session {
    client: Arc<QueryClient>,
    state: ChannelState,
    names: NicknameResolver,
    /// Clients with an open whisper session
    whispers: HashSet<ClientId>,
    /// Background name lookups; aborted when the session is dropped
    lookups: JoinSet<()>,
    events: mpsc::Sender<ChannelEvent>,
}

impl Session {
    /// Create a session over an authenticated client
    pub fn new(
        client: Arc<QueryClient>,
        events: mpsc::Sender<ChannelEvent>,
        name_retry_delay: Duration,
    ) -> Self {
        let names = NicknameResolver::new(Arc::clone(&client), name_retry_delay);
        Self {
            client,
            state: ChannelState::new(),
            names,
            whispers: HashSet::new(),
            lookups: JoinSet::new(),
            events,
        }
    }

    /// Get the channel state
    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Establish identity, names and the initial roster
    pub async fn bootstrap(&mut self) -> Result<()> {
        let me = self.client.whoami().await?;
        let channel_name = self.client.channel_name(&me.channel_id).await?;
        let server_name = self.client.server_name().await?;
        info!(
            "Me: clid={} cid={} channel='{}' server='{}'",
            me.client_id, me.channel_id, channel_name, server_name
        );

        self.state
            .set_me(me.client_id, me.channel_id.clone(), channel_name, server_name);
        self.state.set_group_names(self.client.channel_groups().await);
        self.load_roster(&me.channel_id).await?;
        self.whispers.clear();
        Ok(())
    }

    /// Fetch every client, keep those in `channel` and reseed the name cache
    async fn load_roster(&self, channel: &ChannelId) -> Result<()> {
        let everyone = self.client.client_list().await?;
        self.names.cache().seed(&everyone);
        self.state.set_roster(
            everyone
                .iter()
                .filter_map(ClientEntry::from_entity)
                .filter(|entry| &entry.channel_id == channel),
        );
        debug!(
            "Roster loaded: {} of {} clients in my channel",
            self.state.snapshot().members.len(),
            everyone.len()
        );
        Ok(())
    }

    /// Process one record read while streaming
    pub async fn handle_line(&mut self, line: &str) -> Result<()> {
        let Some(notification) = Notification::parse(line) else {
            trace!("Skipping record: {}", line);
            return Ok(());
        };
        for entity in &notification.entities {
            self.dispatch(notification.kind, entity).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, kind: NotifyKind, entity: &Entity) -> Result<()> {
        match kind {
            NotifyKind::TalkStatusChange => self.handle_talk_status(entity).await,
            NotifyKind::ClientUpdated => self.handle_client_updated(entity).await,
            NotifyKind::ClientMoved => self.handle_client_moved(entity).await,
            NotifyKind::ClientEnterView => self.handle_client_entered(entity).await,
            NotifyKind::ClientLeftView => self.handle_client_left(entity).await,
            NotifyKind::TextMessage => self.handle_text_message(entity).await,
            NotifyKind::Whisper => self.handle_whisper(entity).await,
            NotifyKind::ConnectStatusChange => Self::handle_connect_status(entity),
        }
    }

    async fn handle_talk_status(&mut self, entity: &Entity) -> Result<()> {
        let Some(clid) = client_id(entity) else {
            debug!("talk status without clid");
            return Ok(());
        };
        let talking = entity.value("status") == "1";
        let whisper = entity.flag("isreceivedwhisper").unwrap_or(false);
        trace!("talk: clid={} talking={} whisper={}", clid, talking, whisper);

        if whisper {
            self.state.set_whisper_talking(&clid, talking);
            if !talking {
                self.state.set_talking(&clid, false);
            }
        } else {
            self.state.set_talking(&clid, talking);
            if talking {
                self.state.set_whisper_talking(&clid, false);
            }
        }
        self.push().await;

        if !whisper {
            return Ok(());
        }
        if talking && self.whispers.insert(clid.clone()) {
            let name = match self.names.cache().get(&clid) {
                Some(name) => name,
                None => {
                    while self.lookups.try_join_next().is_some() {}
                    self.names
                        .spawn_lookup(clid.clone(), self.events.clone(), &mut self.lookups);
                    clid.placeholder_name()
                }
            };
            info!("Whisper from {} ({})", name, clid);
            self.emit(ChannelEvent::WhisperOpened {
                clid: clid.clone(),
                name,
            })
            .await;
        }
        self.emit(ChannelEvent::WhisperTalk {
            clid: clid.clone(),
            talking,
        })
        .await;
        // The session lasts as long as the whisper stream
        if !talking && self.whispers.contains(&clid) {
            debug!("Whisper from {} ended", clid);
            self.close_whisper(clid).await;
        }
        Ok(())
    }

    async fn handle_client_updated(&mut self, entity: &Entity) -> Result<()> {
        let Some(clid) = client_id(entity) else {
            return Ok(());
        };
        if !self.state.has(&clid) {
            return Ok(());
        }
        let update = ClientUpdate::allow_listed(entity);
        if update.is_empty() {
            return Ok(());
        }
        if let Some(nickname) = update.nickname.as_ref().filter(|n| !is_placeholder(n)) {
            self.names.cache().insert(clid.clone(), nickname.clone());
        }
        self.state.upsert(&clid, &update);
        self.push().await;
        Ok(())
    }

    async fn handle_client_moved(&mut self, entity: &Entity) -> Result<()> {
        let Some(clid) = client_id(entity) else {
            return Ok(());
        };
        let target = ChannelId::from(entity.value("ctid"));

        if clid == self.state.my_client_id() {
            return self.follow_own_move(target).await;
        }

        let tracked = self.state.has(&clid);
        let mine = self.state.my_channel_id();
        if target == mine && !tracked {
            self.join(clid, target, entity).await?;
        } else if tracked && target != mine {
            let name = self.known_name(&clid);
            self.state.remove(&clid);
            info!("{} moved out to channel {}", name, target);
            self.emit(ChannelEvent::MemberLeft {
                clid: clid.clone(),
                name: name.clone(),
            })
            .await;
            self.emit(ChannelEvent::MemberMoved {
                clid: clid.clone(),
                name,
            })
            .await;
            self.close_whisper(clid).await;
        }
        self.push().await;
        Ok(())
    }

    /// I changed channel: everything I track belongs to the old one
    async fn follow_own_move(&mut self, target: ChannelId) -> Result<()> {
        let channel_name = self.client.channel_name(&target).await?;
        let server_name = self.client.server_name().await?;
        info!("Moved to channel '{}' ({})", channel_name, target);

        self.state.set_me(
            self.state.my_client_id(),
            target.clone(),
            channel_name,
            server_name,
        );
        self.push().await;

        self.load_roster(&target).await?;
        self.emit(ChannelEvent::ChannelChanged).await;
        self.push().await;
        Ok(())
    }

    async fn handle_client_entered(&mut self, entity: &Entity) -> Result<()> {
        let Some(clid) = client_id(entity) else {
            return Ok(());
        };
        let target = ChannelId::from(entity.value("ctid"));
        if target != self.state.my_channel_id() {
            return Ok(());
        }
        if self.state.has(&clid) {
            debug!("{} already tracked, ignoring enter view", clid);
            return Ok(());
        }
        self.join(clid, target, entity).await?;
        self.push().await;
        Ok(())
    }

    async fn handle_client_left(&mut self, entity: &Entity) -> Result<()> {
        let Some(clid) = client_id(entity) else {
            return Ok(());
        };
        self.close_whisper(clid.clone()).await;

        if !self.state.has(&clid) {
            return Ok(());
        }
        let name = self.known_name(&clid);
        self.state.remove(&clid);
        info!("{} left", name);
        self.emit(ChannelEvent::MemberLeft { clid, name }).await;
        self.push().await;
        Ok(())
    }

    async fn handle_text_message(&mut self, entity: &Entity) -> Result<()> {
        let invoker = entity.value("invokerid");
        if invoker == self.state.my_client_id().as_str() {
            return Ok(());
        }
        let Some(kind) = MessageKind::from_target_mode(entity.value("targetmode")) else {
            return Ok(());
        };
        self.emit(ChannelEvent::Message {
            sender: entity.get("invokername").unwrap_or("?").to_string(),
            text: entity.value("msg").to_string(),
            kind,
            origin: invoker.to_string(),
        })
        .await;
        Ok(())
    }

    async fn handle_whisper(&mut self, entity: &Entity) -> Result<()> {
        let clid = client_id(entity).or_else(|| {
            entity
                .get("invokerid")
                .filter(|id| !id.is_empty())
                .map(ClientId::from)
        });

        let mut sender = entity.value("invokername").to_string();
        if let Some(clid) = &clid {
            if sender.is_empty() {
                sender = self.names.resolve(clid, Some(entity)).await;
            } else {
                self.names.cache().insert(clid.clone(), sender.clone());
            }
        }
        if sender.is_empty() {
            sender = ANONYMOUS_WHISPER.to_string();
        }

        let origin = clid.map(|c| c.0).unwrap_or_else(|| sender.clone());
        self.emit(ChannelEvent::Message {
            sender,
            text: entity.value("msg").to_string(),
            kind: MessageKind::Whisper,
            origin,
        })
        .await;
        Ok(())
    }

    fn handle_connect_status(entity: &Entity) -> Result<()> {
        if entity.value("status") == "disconnected" {
            return Err(ClientQueryError::Disconnected);
        }
        Ok(())
    }

    /// Track a client that just arrived in my channel
    async fn join(&mut self, clid: ClientId, channel: ChannelId, entity: &Entity) -> Result<()> {
        let name = self.names.resolve(&clid, Some(entity)).await;

        let mut update = match self.client.client_info(&clid).await? {
            Some(info) => ClientUpdate::from_entity(&info),
            None => ClientUpdate::default(),
        };
        update.channel_id = Some(channel);
        if update.nickname.as_deref().map_or(true, is_placeholder) {
            update.nickname = Some(name.clone());
        }
        self.state.upsert(&clid, &update);
        self.names.cache().insert(clid.clone(), name.clone());

        info!("{} joined", name);
        self.emit(ChannelEvent::MemberJoined { clid, name }).await;
        Ok(())
    }

    /// Name for leave/move events: cache, then the roster entry, then the id
    fn known_name(&self, clid: &ClientId) -> String {
        self.names
            .cache()
            .get(clid)
            .or_else(|| {
                self.state
                    .get(clid)
                    .map(|e| e.nickname)
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or_else(|| clid.to_string())
    }

    async fn close_whisper(&mut self, clid: ClientId) {
        self.whispers.remove(&clid);
        self.emit(ChannelEvent::WhisperClosed { clid }).await;
    }

    /// Push the current snapshot
    pub async fn push(&self) {
        self.emit(ChannelEvent::RosterChanged {
            snapshot: self.state.snapshot(),
        })
        .await;
    }

    pub async fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            trace!("Event receiver dropped");
        }
    }
}
