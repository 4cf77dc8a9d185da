//! Nickname resolution
//!
//! Several notifications carry only a client id. The resolver walks an
//! ordered chain of strategies until one produces a usable name:
//!
//! 1. name fields on the triggering record
//! 2. the session cache
//! 3. repeated `clientinfo` queries
//! 4. a full `clientlist` scan
//!
//! and falls back to a placeholder built from the id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::codec::Entity;
use crate::message::ChannelEvent;
use crate::query::QueryClient;
use crate::types::ClientId;

/// Inline fields that may carry a name, most specific first
const INLINE_NAME_FIELDS: &[&str] = &["client_nickname", "invokername", "client_base64HashClientUID"];

/// `clientinfo` fields that may carry a name
const INFO_NAME_FIELDS: &[&str] = &["client_nickname", "client_base64HashClientUID"];

/// `clientinfo` attempts before moving on to the roster scan
const CLIENT_INFO_ATTEMPTS: u32 = 4;

/// Values the voice client uses when it does not know a name
pub fn is_placeholder(name: &str) -> bool {
    matches!(name, "" | "?" | "0")
}

fn first_name(entity: &Entity, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| entity.get(f))
        .find(|v| !is_placeholder(v))
        .map(str::to_string)
}

/// Client id to last-known display name
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct NicknameCache {
    names: Arc<Mutex<HashMap<ClientId, String>>>,
}

impl NicknameCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, String>> {
        self.names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached name, ignoring placeholders
    pub fn get(&self, clid: &ClientId) -> Option<String> {
        self.lock()
            .get(clid)
            .filter(|name| !is_placeholder(name))
            .cloned()
    }

    /// Remember a name, replacing any older one
    pub fn insert(&self, clid: ClientId, name: String) {
        self.lock().insert(clid, name);
    }

    /// Replace the cache with the names found in a `clientlist`
    pub fn seed(&self, entities: &[Entity]) {
        let seeded = entities
            .iter()
            .filter_map(|e| {
                let clid = e.get("clid")?;
                let name = e.get("client_nickname").unwrap_or("?");
                Some((ClientId::from(clid), name.to_string()))
            })
            .collect();
        *self.lock() = seeded;
    }

    /// Number of cached ids
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Inline,
    Cache,
    ClientInfo,
    RosterScan,
}

const CHAIN: [Strategy; 4] = [
    Strategy::Inline,
    Strategy::Cache,
    Strategy::ClientInfo,
    Strategy::RosterScan,
];

/// Resolves client ids to display names for one session
#[derive(Debug, Clone)]
pub struct NicknameResolver {
    client: Arc<QueryClient>,
    cache: NicknameCache,
    retry_delay: Duration,
}

impl NicknameResolver {
    /// Create a resolver with an empty cache
    pub fn new(client: Arc<QueryClient>, retry_delay: Duration) -> Self {
        Self {
            client,
            cache: NicknameCache::new(),
            retry_delay,
        }
    }

    /// Get the session cache
    pub fn cache(&self) -> &NicknameCache {
        &self.cache
    }

    /// Best display name for `clid`; never fails
    pub async fn resolve(&self, clid: &ClientId, inline: Option<&Entity>) -> String {
        for strategy in CHAIN {
            if let Some(name) = self.attempt(strategy, clid, inline).await {
                trace!("Resolved {} to '{}' via {:?}", clid, name, strategy);
                if strategy != Strategy::Cache {
                    self.cache.insert(clid.clone(), name.clone());
                }
                return name;
            }
        }
        debug!("No name found for client {}", clid);
        clid.placeholder_name()
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        clid: &ClientId,
        inline: Option<&Entity>,
    ) -> Option<String> {
        match strategy {
            Strategy::Inline => inline.and_then(|e| first_name(e, INLINE_NAME_FIELDS)),
            Strategy::Cache => self.cache.get(clid),
            Strategy::ClientInfo => self.from_client_info(clid).await,
            Strategy::RosterScan => self.from_roster(clid).await,
        }
    }

    async fn from_client_info(&self, clid: &ClientId) -> Option<String> {
        for attempt in 1..=CLIENT_INFO_ATTEMPTS {
            match self.client.client_info(clid).await {
                Ok(Some(info)) => {
                    if let Some(name) = first_name(&info, INFO_NAME_FIELDS) {
                        return Some(name);
                    }
                }
                Ok(None) => {}
                Err(e) => trace!("clientinfo {} attempt {} failed: {}", clid, attempt, e),
            }
            if attempt < CLIENT_INFO_ATTEMPTS {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }
        None
    }

    async fn from_roster(&self, clid: &ClientId) -> Option<String> {
        let entities = self.client.client_list().await.ok()?;
        entities
            .iter()
            .find(|e| e.get("clid") == Some(clid.as_str()))
            .and_then(|e| first_name(e, &["client_nickname"]))
    }

    /// Look the name up once in the background
    ///
    /// The task lives in `tasks`, so dropping the set cancels it. On success
    /// the cache is updated and [`ChannelEvent::NameResolved`] is emitted.
    pub fn spawn_lookup(
        &self,
        clid: ClientId,
        events: mpsc::Sender<ChannelEvent>,
        tasks: &mut JoinSet<()>,
    ) {
        let client = Arc::clone(&self.client);
        let cache = self.cache.clone();
        tasks.spawn(async move {
            let info = match client.client_info(&clid).await {
                Ok(Some(info)) => info,
                Ok(None) => return,
                Err(e) => {
                    debug!("Background lookup of {} failed: {}", clid, e);
                    return;
                }
            };
            let Some(name) = first_name(&info, &["client_nickname"]) else {
                return;
            };
            cache.insert(clid.clone(), name.clone());
            if events
                .send(ChannelEvent::NameResolved { clid, name })
                .await
                .is_err()
            {
                trace!("Event receiver dropped before name lookup finished");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_entity;
    use crate::testing::{voice_server, FakeVoiceClient};
    use crate::transport::LineTransport;

    async fn resolver_for(fake: &FakeVoiceClient) -> NicknameResolver {
        let transport = LineTransport::connect("127.0.0.1", fake.port(), Duration::from_secs(2))
            .await
            .unwrap();
        let client = Arc::new(QueryClient::new(transport, Duration::from_secs(2)));
        NicknameResolver::new(client, Duration::from_millis(1))
    }

    #[test]
    fn test_placeholder_values() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("?"));
        assert!(is_placeholder("0"));
        assert!(!is_placeholder("Ana"));
    }

    #[test]
    fn test_cache_seed_and_placeholder_filter() {
        let cache = NicknameCache::new();
        cache.seed(&[
            parse_entity("clid=5 client_nickname=Ana"),
            parse_entity("clid=6"),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&ClientId::from("5")).as_deref(), Some("Ana"));
        assert_eq!(cache.get(&ClientId::from("6")), None);
    }

    #[tokio::test]
    async fn test_inline_name_wins_without_queries() {
        let fake = FakeVoiceClient::start(voice_server("1", "1", vec![])).await;
        let resolver = resolver_for(&fake).await;

        let record = parse_entity("clid=9 invokername=Cy\\sD");
        let name = resolver.resolve(&ClientId::from("9"), Some(&record)).await;

        assert_eq!(name, "Cy D");
        assert_eq!(resolver.cache().get(&ClientId::from("9")).as_deref(), Some("Cy D"));
        assert!(fake.commands().is_empty());
    }

    #[tokio::test]
    async fn test_cache_before_queries() {
        let fake = FakeVoiceClient::start(voice_server("1", "1", vec![])).await;
        let resolver = resolver_for(&fake).await;
        resolver.cache().insert(ClientId::from("9"), "Cached".into());

        let record = parse_entity("clid=9 client_nickname=?");
        let name = resolver.resolve(&ClientId::from("9"), Some(&record)).await;
        assert_eq!(name, "Cached");
        assert!(fake.commands().is_empty());
    }

    #[tokio::test]
    async fn test_client_info_lookup() {
        let fake = FakeVoiceClient::start(voice_server("1", "1", vec![("9", "2", "Dee")])).await;
        let resolver = resolver_for(&fake).await;

        let name = resolver.resolve(&ClientId::from("9"), None).await;
        assert_eq!(name, "Dee");
        assert_eq!(fake.commands(), vec!["clientinfo clid=9".to_string()]);
        assert_eq!(resolver.cache().get(&ClientId::from("9")).as_deref(), Some("Dee"));
    }

    #[tokio::test]
    async fn test_roster_scan_after_client_info_fails() {
        let fake = FakeVoiceClient::start(|cmd: &str| match cmd {
            "clientlist -voice -info -groups" => vec![
                "clid=9 cid=1 client_nickname=Eve".into(),
                "error id=0 msg=ok".into(),
            ],
            _ => vec!["error id=512 msg=invalid\\sclientID".into()],
        })
        .await;
        let resolver = resolver_for(&fake).await;

        let name = resolver.resolve(&ClientId::from("9"), None).await;
        assert_eq!(name, "Eve");

        let commands = fake.commands();
        let info_calls = commands.iter().filter(|c| c.starts_with("clientinfo")).count();
        assert_eq!(info_calls, CLIENT_INFO_ATTEMPTS as usize);
        assert_eq!(commands.last().map(String::as_str), Some("clientlist -voice -info -groups"));
    }

    #[tokio::test]
    async fn test_placeholder_when_everything_fails() {
        let fake = FakeVoiceClient::start(voice_server("1", "1", vec![])).await;
        let resolver = resolver_for(&fake).await;

        let name = resolver.resolve(&ClientId::from("40321"), None).await;
        assert_eq!(name, "User-0321");
        assert!(resolver.cache().get(&ClientId::from("40321")).is_none());
    }

    #[tokio::test]
    async fn test_background_lookup_emits_event() {
        let fake = FakeVoiceClient::start(voice_server("1", "1", vec![("9", "2", "Dee")])).await;
        let resolver = resolver_for(&fake).await;
        let (tx, mut rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();

        resolver.spawn_lookup(ClientId::from("9"), tx, &mut tasks);
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ChannelEvent::NameResolved {
                clid: ClientId::from("9"),
                name: "Dee".into()
            }
        );
        assert_eq!(resolver.cache().get(&ClientId::from("9")).as_deref(), Some("Dee"));
    }

    #[tokio::test]
    async fn test_no_wait_after_last_client_info_attempt() {
        let fake = FakeVoiceClient::start(|_: &str| {
            vec!["error id=512 msg=invalid\\sclientID".to_string()]
        })
        .await;
        let transport = LineTransport::connect("127.0.0.1", fake.port(), Duration::from_secs(2))
            .await
            .unwrap();
        let client = Arc::new(QueryClient::new(transport, Duration::from_secs(2)));
        let resolver = NicknameResolver::new(client, Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let name = resolver.resolve(&ClientId::from("12"), None).await;

        assert_eq!(name, "User-12");
        // 100 + 200 + 300 ms between the four attempts, nothing after the last
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(950), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_dropping_lookup_tasks_releases_client() {
        // Never answers, so the lookup stays parked on the socket
        let fake = FakeVoiceClient::start(|_: &str| Vec::new()).await;
        let transport = LineTransport::connect("127.0.0.1", fake.port(), Duration::from_secs(2))
            .await
            .unwrap();
        let client = Arc::new(QueryClient::new(transport, Duration::from_secs(30)));
        let resolver = NicknameResolver::new(Arc::clone(&client), Duration::from_millis(1));
        let (tx, _rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();

        resolver.spawn_lookup(ClientId::from("9"), tx, &mut tasks);
        drop(resolver);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&client), 2);

        drop(tasks);
        tokio::time::timeout(Duration::from_secs(2), async {
            while Arc::strong_count(&client) > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
