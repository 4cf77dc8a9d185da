//! Protocol client
//!
//! Issues one command at a time over the shared socket and returns its
//! correlated response. Notification records that arrive while a reply is
//! being collected are set aside and later handed to
//! [`QueryClient::next_notification`], so the streaming consumer sees every
//! push exactly once and in order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::codec::{self, Command, Entity, Status};
use crate::error::{ClientQueryError, Result};
use crate::notify::NotifyKind;
use crate::transport::LineTransport;
use crate::types::{ChannelId, ClientId};

/// Default wait for a command's terminating status record
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(8);

/// Data records and the status that terminated them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub records: Vec<String>,
    pub status: Status,
}

impl Response {
    /// Check if the command succeeded
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Every entity of every data record
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.records.iter().flat_map(|r| codec::parse_record(r))
    }
}

/// Own identity as reported by `whoami`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: ClientId,
    pub channel_id: ChannelId,
}

#[derive(Debug)]
struct Inner {
    transport: LineTransport,
    /// Notifications read while waiting for a reply
    pending: VecDeque<String>,
}

/// ClientQuery protocol client
///
/// All socket access goes through one async mutex: a command's write and
/// the reads that collect its reply are never interleaved with another
/// command or with the notification reader.
#[derive(Debug)]
pub struct QueryClient {
    inner: Mutex<Inner>,
    response_timeout: Duration,
}

impl QueryClient {
    /// Wrap a connected transport
    pub fn new(transport: LineTransport, response_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                transport,
                pending: VecDeque::new(),
            }),
            response_timeout,
        }
    }

    /// Send one command and collect its response
    pub async fn execute(&self, command: &Command) -> Result<Response> {
        let mut inner = self.inner.lock().await;
        let Inner { transport, pending } = &mut *inner;

        trace!("-> {}", command);
        transport.write_line(&command.to_wire()).await?;

        let deadline = Instant::now() + self.response_timeout;
        let mut records = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientQueryError::ResponseTimeout(command.to_string()));
            }
            let Some(line) = transport.read_line(remaining).await? else {
                continue;
            };

            if codec::is_notification(&line) {
                trace!("set aside: {}", line);
                pending.push_back(line);
                continue;
            }
            if let Some(status) = Status::parse(&line) {
                trace!("<- {} ({} records)", status, records.len());
                return Ok(Response { records, status });
            }
            records.push(line);
        }
    }

    /// Next notification record, or `None` if nothing arrived within `poll`
    ///
    /// Records set aside by [`execute`](Self::execute) are returned first.
    pub async fn next_notification(&self, poll: Duration) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        if let Some(line) = inner.pending.pop_front() {
            return Ok(Some(line));
        }
        inner.transport.read_line(poll).await
    }

    /// Authenticate with the client's API key
    pub async fn authenticate(&self, api_key: &str) -> Result<()> {
        let response = self
            .execute(&Command::new("auth").arg("apikey", api_key))
            .await?;
        if !response.is_ok() {
            return Err(ClientQueryError::AuthFailure(response.status.to_string()));
        }
        debug!("Authenticated");
        Ok(())
    }

    /// Register for every notification class in `kinds`
    pub async fn subscribe(&self, kinds: &[NotifyKind]) -> Result<()> {
        for kind in kinds {
            let command = Command::new("clientnotifyregister")
                .arg("schandlerid", "0")
                .arg("event", kind.as_str());
            let response = self.execute(&command).await?;
            if response.is_ok() {
                debug!("Subscribed to {}", kind.as_str());
            } else {
                warn!("Subscribing to {} failed: {}", kind.as_str(), response.status);
            }
        }
        Ok(())
    }

    /// Own client id and channel id
    pub async fn whoami(&self) -> Result<Identity> {
        let response = self.execute(&Command::new("whoami")).await?;
        if !response.is_ok() {
            debug!("whoami refused: {}", response.status);
            return Err(ClientQueryError::NotConnected);
        }
        let me = response
            .entities()
            .find(|e| e.contains("clid"))
            .ok_or_else(|| ClientQueryError::Protocol("whoami returned no clid".into()))?;

        let channel_id = ChannelId::from(me.value("cid"));
        if channel_id.is_empty() {
            return Err(ClientQueryError::NotConnected);
        }
        Ok(Identity {
            client_id: ClientId::from(me.value("clid")),
            channel_id,
        })
    }

    /// Every client on the server with voice, info and group fields
    pub async fn client_list(&self) -> Result<Vec<Entity>> {
        let command = Command::new("clientlist")
            .flag("voice")
            .flag("info")
            .flag("groups");
        let response = self.execute(&command).await?;
        if !response.is_ok() {
            return Err(ClientQueryError::Query {
                command: command.to_string(),
                status: response.status,
            });
        }
        let clients = response.entities().filter(|e| e.contains("clid")).collect();
        Ok(clients)
    }

    /// Details of one client, `None` if the client is unknown
    pub async fn client_info(&self, clid: &ClientId) -> Result<Option<Entity>> {
        let response = self
            .execute(&Command::new("clientinfo").arg("clid", clid.as_str()))
            .await?;
        let info = response.entities().find(|e| e.contains("client_nickname"));
        Ok(info)
    }

    /// Display name of a channel, empty if not found
    pub async fn channel_name(&self, cid: &ChannelId) -> Result<String> {
        let response = self.execute(&Command::new("channellist")).await?;
        let name = response
            .entities()
            .find(|e| e.get("cid") == Some(cid.as_str()))
            .map(|e| e.value("channel_name").to_string())
            .unwrap_or_default();
        Ok(name)
    }

    /// Display name of the server, empty if not reported
    pub async fn server_name(&self) -> Result<String> {
        let response = self.execute(&Command::new("serverinfo")).await?;
        let name = response
            .entities()
            .find_map(|e| e.get("virtualserver_name").map(str::to_string))
            .unwrap_or_default();
        Ok(name)
    }

    /// Channel group id to group name; empty on any failure
    pub async fn channel_groups(&self) -> HashMap<String, String> {
        let response = match self.execute(&Command::new("channelgrouplist")).await {
            Ok(response) => response,
            Err(e) => {
                warn!("channelgrouplist failed: {}", e);
                return HashMap::new();
            }
        };
        response
            .entities()
            .filter_map(|e| {
                let cgid = e.get("cgid").filter(|id| !id.is_empty())?;
                Some((cgid.to_string(), e.value("name").to_string()))
            })
            .collect()
    }

    /// Close the write half so the peer sees a clean disconnect
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Err(e) = inner.transport.shutdown().await {
            trace!("shutdown: {}", e);
        }
    }
}
