// ── Server registry ──
//
// Owns every known server, merges new sightings into existing entries,
// evicts servers whose connections all disappeared, and tracks the single
// process-wide "best" server. Observers learn about changes through a
// broadcast channel of `RegistryEvent`s.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::lock::lock;
use crate::model::{Connection, ConnectionClass, Mechanisms, Server, ServerDetails, ServerId};
use crate::persist::{FORMAT_VERSION, RegistrySnapshot, ServerRecord};
use crate::reachability::ConnectionProbe;
use crate::url::{PlexUrl, ServerRef};

/// Identifier of the built-in loopback server.
pub const LOCAL_SERVER_ID: &str = "local";
/// Identifier of the built-in account-service server.
pub const MYPLEX_SERVER_ID: &str = "myplex";

const EVENT_CHANNEL_SIZE: usize = 256;

// ── Events ───────────────────────────────────────────────────────────

/// Change notifications emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A server was found reachable (or restored from saved state).
    ServerAvailable(ServerId),
    /// A server's reachability race found no usable connection.
    ServerUnavailable(ServerId),
    /// A server lost all of its connections and was evicted.
    ServerRemoved(ServerId),
    BestServerChanged(ServerId),
    BestServerCleared,
}

impl RegistryEvent {
    pub fn server_id(&self) -> Option<&ServerId> {
        match self {
            Self::ServerAvailable(id)
            | Self::ServerUnavailable(id)
            | Self::ServerRemoved(id)
            | Self::BestServerChanged(id) => Some(id),
            Self::BestServerCleared => None,
        }
    }
}

/// Ownership filter for listing servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerFilter {
    Owned,
    Shared,
    #[default]
    All,
}

impl ServerFilter {
    fn accepts(self, server: &Server) -> bool {
        match self {
            Self::Owned => server.is_owned(),
            Self::Shared => !server.is_owned(),
            Self::All => true,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Shared handle to the set of known servers.
///
/// Cheaply cloneable via `Arc<RegistryInner>`.
#[derive(Clone)]
pub struct ServerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    servers: Mutex<HashMap<ServerId, Arc<Server>>>,
    best: Mutex<Option<Arc<Server>>>,
    /// Serialises update passes so one pass's mark/merge/finish is never
    /// split by another's.
    update: Mutex<()>,
    events: broadcast::Sender<RegistryEvent>,
    probe: Arc<dyn ConnectionProbe>,
    race_ceiling: Duration,
    state_path: Option<PathBuf>,
    local: Arc<Server>,
    myplex: Arc<Server>,
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.len())
            .field("best", &self.best_server().map(|s| s.id().clone()))
            .field("state_path", &self.inner.state_path)
            .finish_non_exhaustive()
    }
}

impl ServerRegistry {
    pub fn new(
        probe: Arc<dyn ConnectionProbe>,
        race_ceiling: Duration,
        state_path: Option<PathBuf>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(RegistryInner {
                servers: Mutex::new(HashMap::new()),
                best: Mutex::new(None),
                update: Mutex::new(()),
                events,
                probe,
                race_ceiling,
                state_path,
                local: Arc::new(builtin_local()),
                myplex: Arc::new(builtin_myplex()),
            }),
        }
    }

    /// Subscribe to registry change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    fn notify(&self, event: RegistryEvent) {
        debug!(?event, "registry notification");
        let _ = self.inner.events.send(event);
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        lock(&self.inner.servers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.servers).is_empty()
    }

    /// Server by identifier, including the built-in `local` and `myplex`.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Server>> {
        match id {
            MYPLEX_SERVER_ID => Some(Arc::clone(&self.inner.myplex)),
            LOCAL_SERVER_ID => Some(Arc::clone(&self.inner.local)),
            _ => lock(&self.inner.servers).get(&ServerId::from(id)).cloned(),
        }
    }

    /// First registered server with a connection at `host:port`.
    pub fn find_by_host_and_port(&self, host: &str, port: u16) -> Option<Arc<Server>> {
        lock(&self.inner.servers)
            .values()
            .find(|s| s.find_connection(host, port).is_some())
            .cloned()
    }

    /// The server a `plexserver://` URL addresses.
    pub fn resolve(&self, url: &PlexUrl) -> Result<Arc<Server>, CoreError> {
        let found = match url.server_ref() {
            ServerRef::Id(id) => self.find_by_id(id),
            ServerRef::Address { host, port } => self.find_by_host_and_port(host, port),
        };
        found.ok_or_else(|| CoreError::ServerNotFound {
            identifier: url.host().to_owned(),
        })
    }

    /// Registered servers matching `filter`, ordered by identifier.
    pub fn servers(&self, filter: ServerFilter) -> Vec<Arc<Server>> {
        let mut servers: Vec<Arc<Server>> = lock(&self.inner.servers)
            .values()
            .filter(|s| filter.accepts(s))
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.id().cmp(b.id()));
        servers
    }

    // ── Merge & eviction ─────────────────────────────────────────────

    /// Merge `incoming` into the registry and return the live entry.
    pub fn merge_server(&self, incoming: Arc<Server>) -> Arc<Server> {
        let mut servers = lock(&self.inner.servers);
        if let Some(existing) = servers.get(incoming.id()).cloned() {
            existing.merge(&incoming);
            debug!(
                server = %existing,
                incoming = incoming.connection_count(),
                total = existing.connection_count(),
                "merged server"
            );
            existing
        } else {
            info!(
                server = %incoming,
                connections = incoming.connection_count(),
                "added new server"
            );
            servers.insert(incoming.id().clone(), Arc::clone(&incoming));
            incoming
        }
    }

    /// Close an update pass for `mechanism` on every server, evicting the
    /// ones left without connections. Returns the evicted identifiers.
    pub fn mark_update_finished(&self, mechanism: Mechanisms) -> Vec<ServerId> {
        let evicted: Vec<Arc<Server>> = {
            let mut servers = lock(&self.inner.servers);
            let ids: Vec<ServerId> = servers
                .iter()
                .filter(|(_, s)| s.mark_update_finished(mechanism))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| servers.remove(id)).collect()
        };

        for server in &evicted {
            info!(server = %server, "removing server");
            let was_best = lock(&self.inner.best)
                .as_ref()
                .is_some_and(|b| Arc::ptr_eq(b, server));
            if was_best {
                self.clear_best_server();
            }
            self.notify(RegistryEvent::ServerRemoved(server.id().clone()));
        }
        evicted.iter().map(|s| s.id().clone()).collect()
    }

    /// Replace everything `class` vouches for with `servers`.
    ///
    /// Servers and connections no longer reported by this mechanism are
    /// evicted, state is saved, and a reachability update is started in
    /// the background; the returned handle resolves when it finishes.
    pub fn update_from_connection_type(
        &self,
        servers: Vec<Arc<Server>>,
        class: ConnectionClass,
    ) -> JoinHandle<()> {
        let reported = servers.len();
        let evicted = {
            let _update = lock(&self.inner.update);
            for server in lock(&self.inner.servers).values() {
                server.mark_as_refreshing();
            }
            for server in servers {
                self.merge_server(server);
            }
            self.mark_update_finished(class.mechanism())
        };
        info!(
            %class,
            reported,
            evicted = evicted.len(),
            total = self.len(),
            "server update finished"
        );

        self.save_quietly();
        self.spawn_update_reachability(false)
    }

    /// A single server seen by discovery: merge, announce, offer as best.
    pub fn update_from_discovery(&self, server: Arc<Server>) -> Arc<Server> {
        let server = self.merge_server(server);
        self.notify(RegistryEvent::ServerAvailable(server.id().clone()));
        self.set_best_server(&server, false);
        server
    }

    // ── Best server ──────────────────────────────────────────────────

    pub fn best_server(&self) -> Option<Arc<Server>> {
        lock(&self.inner.best).clone()
    }

    /// Offer `server` as best. Accepted when there is no best yet, when
    /// forced, or when it already is best. Returns whether it was accepted.
    pub fn set_best_server(&self, server: &Arc<Server>, force: bool) -> bool {
        {
            let mut best = lock(&self.inner.best);
            let accept = match best.as_ref() {
                None => true,
                Some(current) => force || Arc::ptr_eq(current, server),
            };
            if !accept {
                return false;
            }
            *best = Some(Arc::clone(server));
        }
        info!(server = %server, force, "best server updated");
        self.notify(RegistryEvent::BestServerChanged(server.id().clone()));
        true
    }

    /// Force the best server by identifier.
    pub fn set_best_server_by_id(&self, id: &str, force: bool) -> Result<bool, CoreError> {
        let server = self
            .find_by_id(id)
            .ok_or_else(|| CoreError::ServerNotFound {
                identifier: id.to_owned(),
            })?;
        Ok(self.set_best_server(&server, force))
    }

    pub fn clear_best_server(&self) {
        let previous = lock(&self.inner.best).take();
        if let Some(previous) = previous {
            info!(server = %previous, "best server cleared");
            self.notify(RegistryEvent::BestServerCleared);
        }
    }

    /// Outcome of one server's reachability race.
    pub fn server_reachability_done(&self, server: &Arc<Server>, success: bool) {
        if success {
            if server.is_owned() && !server.is_secondary() {
                self.set_best_server(server, false);
            }
            self.notify(RegistryEvent::ServerAvailable(server.id().clone()));
        } else {
            let was_best = lock(&self.inner.best)
                .as_ref()
                .is_some_and(|b| Arc::ptr_eq(b, server));
            if was_best {
                self.clear_best_server();
            }
            self.notify(RegistryEvent::ServerUnavailable(server.id().clone()));
        }
    }

    // ── Reachability ─────────────────────────────────────────────────

    /// Race every registered server concurrently.
    ///
    /// Servers that already have an active connection are skipped unless
    /// `force` is set.
    pub async fn update_reachability(&self, force: bool) {
        let servers = self.servers(ServerFilter::All);
        debug!(force, servers = servers.len(), "updating reachability");

        let mut races = JoinSet::new();
        for server in servers {
            if !force && server.active_connection().is_some() {
                continue;
            }
            let registry = self.clone();
            races.spawn(async move {
                let success = server
                    .update_reachability(&registry.inner.probe, registry.inner.race_ceiling)
                    .await;
                registry.server_reachability_done(&server, success);
            });
        }

        while let Some(joined) = races.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "reachability task failed");
            }
        }
    }

    /// Run `update_reachability` in the background.
    pub fn spawn_update_reachability(&self, force: bool) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move { registry.update_reachability(force).await })
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Plain-data copy of the registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            version: FORMAT_VERSION,
            best_server: self.best_server().map(|s| s.id().clone()),
            saved_at: Utc::now(),
            servers: self
                .servers(ServerFilter::All)
                .iter()
                .map(|s| ServerRecord::from(s.as_ref()))
                .collect(),
        }
    }

    /// Register the servers of `snapshot` and restore its best server.
    /// Returns how many servers were restored.
    pub fn restore(&self, snapshot: RegistrySnapshot) -> usize {
        let mut restored = 0;
        for record in snapshot.servers {
            let Some(server) = record.into_server() else {
                warn!("skipping saved server without identifier");
                continue;
            };
            debug!(server = %server, "restored server from saved state");
            let server = self.merge_server(server);
            self.notify(RegistryEvent::ServerAvailable(server.id().clone()));
            restored += 1;
        }

        if let Some(best) = snapshot.best_server {
            if let Some(server) = self.find_by_id(best.as_str()) {
                self.set_best_server(&server, true);
            }
        }
        restored
    }

    /// Save to the configured state file (no-op without one).
    pub fn save(&self) -> Result<(), CoreError> {
        let Some(path) = &self.inner.state_path else {
            return Ok(());
        };
        self.snapshot().write_to(path)?;
        debug!(path = %path.display(), "saved registry state");
        Ok(())
    }

    fn save_quietly(&self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "could not save registry state");
        }
    }

    /// Load from the configured state file. Returns how many servers were
    /// restored (zero when there is no file).
    pub fn load(&self) -> Result<usize, CoreError> {
        let Some(path) = &self.inner.state_path else {
            return Ok(0);
        };
        let Some(snapshot) = RegistrySnapshot::read_from(path)? else {
            debug!(path = %path.display(), "no saved registry state");
            return Ok(0);
        };
        let restored = self.restore(snapshot);
        info!(path = %path.display(), restored, "loaded registry state");
        Ok(restored)
    }
}

// ── Built-in servers ─────────────────────────────────────────────────

fn builtin_local() -> Server {
    let name = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
    Server::new(LOCAL_SERVER_ID, ServerDetails::named(name, true)).with_connections([
        Connection::new(ConnectionClass::Manual, "http", "127.0.0.1", 32400, true, None),
    ])
}

fn builtin_myplex() -> Server {
    Server::new(MYPLEX_SERVER_ID, ServerDetails::named("myPlex", true)).with_connections([
        Connection::new(
            ConnectionClass::Account,
            "https",
            "my.plexapp.com",
            443,
            false,
            None,
        ),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;

    use super::*;

    struct NeverProbe;

    impl ConnectionProbe for NeverProbe {
        fn probe(&self, _: Arc<Server>, _: Arc<Connection>) -> BoxFuture<'static, bool> {
            async { false }.boxed()
        }
    }

    fn registry() -> ServerRegistry {
        ServerRegistry::new(Arc::new(NeverProbe), Duration::from_secs(1), None)
    }

    fn server(id: &str, owned: bool, hosts: &[&str], class: ConnectionClass) -> Arc<Server> {
        Arc::new(
            Server::new(id, ServerDetails::named(id.to_uppercase(), owned)).with_connections(
                hosts
                    .iter()
                    .map(|h| Connection::new(class, "http", *h, 32400, true, None)),
            ),
        )
    }

    #[test]
    fn merge_keeps_existing_handle() {
        let registry = registry();
        let first = registry.merge_server(server("a", true, &["10.0.0.2"], ConnectionClass::Manual));
        let second =
            registry.merge_server(server("a", true, &["10.0.0.3"], ConnectionClass::Manual));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.connection_count(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn first_best_server_wins() {
        let registry = registry();
        let a = registry.merge_server(server("a", true, &["10.0.0.2"], ConnectionClass::Manual));
        let b = registry.merge_server(server("b", true, &["10.0.0.3"], ConnectionClass::Manual));

        registry.server_reachability_done(&a, true);
        registry.server_reachability_done(&b, true);
        assert_eq!(registry.best_server().unwrap().id().as_str(), "a");

        assert!(registry.set_best_server(&b, true));
        assert_eq!(registry.best_server().unwrap().id().as_str(), "b");
    }

    #[test]
    fn shared_or_secondary_servers_never_become_best() {
        let registry = registry();
        let shared = registry.merge_server(server("s", false, &["10.0.0.2"], ConnectionClass::Manual));
        registry.server_reachability_done(&shared, true);
        assert!(registry.best_server().is_none());

        let secondary = registry.merge_server(server("x", true, &["10.0.0.4"], ConnectionClass::Manual));
        secondary.collect_data_from_root(
            &plexlink_api::XmlElement::new("MediaContainer").with_attr("serverClass", "secondary"),
        );
        registry.server_reachability_done(&secondary, true);
        assert!(registry.best_server().is_none());
    }

    #[test]
    fn unreachable_best_is_cleared() {
        let registry = registry();
        let a = registry.merge_server(server("a", true, &["10.0.0.2"], ConnectionClass::Manual));
        let mut events = registry.subscribe();

        registry.server_reachability_done(&a, true);
        registry.server_reachability_done(&a, false);

        assert!(registry.best_server().is_none());
        let seen: Vec<RegistryEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![
                RegistryEvent::BestServerChanged(ServerId::new("a")),
                RegistryEvent::ServerAvailable(ServerId::new("a")),
                RegistryEvent::BestServerCleared,
                RegistryEvent::ServerUnavailable(ServerId::new("a")),
            ]
        );
    }

    #[test]
    fn unknown_id_cannot_be_forced_best() {
        let registry = registry();
        let err = registry.set_best_server_by_id("nope", true).unwrap_err();
        assert!(matches!(err, CoreError::ServerNotFound { .. }));
    }

    #[test]
    fn builtins_resolve_but_are_not_listed() {
        let registry = registry();
        assert!(registry.find_by_id(LOCAL_SERVER_ID).is_some());
        assert!(registry.find_by_id(MYPLEX_SERVER_ID).is_some());
        assert!(registry.servers(ServerFilter::All).is_empty());
    }

    #[test]
    fn finds_by_host_and_port() {
        let registry = registry();
        registry.merge_server(server("a", true, &["10.0.0.2"], ConnectionClass::Manual));
        assert_eq!(
            registry.find_by_host_and_port("10.0.0.2", 32400).unwrap().id().as_str(),
            "a"
        );
        assert!(registry.find_by_host_and_port("10.0.0.2", 1).is_none());

        let url = PlexUrl::parse("plexserver://10.0.0.2:32400/library").unwrap();
        assert_eq!(registry.resolve(&url).unwrap().id().as_str(), "a");
    }

    #[test]
    fn filters_by_ownership() {
        let registry = registry();
        registry.merge_server(server("a", true, &["10.0.0.2"], ConnectionClass::Manual));
        registry.merge_server(server("b", false, &["10.0.0.3"], ConnectionClass::Manual));

        assert_eq!(registry.servers(ServerFilter::Owned).len(), 1);
        assert_eq!(registry.servers(ServerFilter::Shared)[0].id().as_str(), "b");
        assert_eq!(registry.servers(ServerFilter::All).len(), 2);
    }

    #[tokio::test]
    async fn connection_type_update_evicts_vanished_servers() {
        let registry = registry();
        let mut events = registry.subscribe();

        registry
            .update_from_connection_type(
                vec![
                    server("a", true, &["10.0.0.2"], ConnectionClass::Discovered),
                    server("b", true, &["10.0.0.3"], ConnectionClass::Discovered),
                ],
                ConnectionClass::Discovered,
            )
            .await
            .unwrap();
        assert_eq!(registry.len(), 2);

        registry
            .update_from_connection_type(
                vec![server("a", true, &["10.0.0.2"], ConnectionClass::Discovered)],
                ConnectionClass::Discovered,
            )
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_id("b").is_none());
        let seen: Vec<RegistryEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(seen.contains(&RegistryEvent::ServerRemoved(ServerId::new("b"))));
    }

    #[tokio::test]
    async fn other_mechanisms_keep_server_alive() {
        let registry = registry();
        registry
            .update_from_connection_type(
                vec![server("a", true, &["10.0.0.2"], ConnectionClass::Manual)],
                ConnectionClass::Manual,
            )
            .await
            .unwrap();
        registry
            .update_from_connection_type(
                vec![server("a", true, &["10.0.0.2"], ConnectionClass::Discovered)],
                ConnectionClass::Discovered,
            )
            .await
            .unwrap();

        registry
            .update_from_connection_type(Vec::new(), ConnectionClass::Discovered)
            .await
            .unwrap();

        let a = registry.find_by_id("a").unwrap();
        assert_eq!(a.connection_count(), 1);
        assert_eq!(a.connections()[0].mechanisms(), Mechanisms::MANUAL);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_passes_keep_their_own_connections() {
        let registry = registry();
        let passes = [
            (ConnectionClass::Manual, "10.0.0.2"),
            (ConnectionClass::Discovered, "10.0.0.3"),
        ]
        .map(|(class, host)| {
            let registry = registry.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..500 {
                    drop(registry.update_from_connection_type(
                        vec![server("a", true, &[host], class)],
                        class,
                    ));
                    let a = registry.find_by_id("a").unwrap();
                    assert!(
                        a.find_connection(host, 32400).is_some(),
                        "{class} pass lost its own connection"
                    );
                }
            })
        });
        for pass in passes {
            pass.await.unwrap();
        }

        assert_eq!(registry.find_by_id("a").unwrap().connection_count(), 2);
    }

    #[test]
    fn discovery_merges_announces_and_offers_best() {
        let registry = registry();
        let existing =
            registry.merge_server(server("a", true, &["10.0.0.2"], ConnectionClass::Manual));
        let mut events = registry.subscribe();

        let merged = registry.update_from_discovery(server(
            "a",
            true,
            &["10.0.0.3"],
            ConnectionClass::Discovered,
        ));

        assert!(Arc::ptr_eq(&existing, &merged));
        assert_eq!(merged.connection_count(), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.best_server().unwrap().id().as_str(), "a");
        let seen: Vec<RegistryEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(seen.contains(&RegistryEvent::ServerAvailable(ServerId::new("a"))));
        assert!(seen.contains(&RegistryEvent::BestServerChanged(ServerId::new("a"))));

        // Another best is already in place, so the newcomer is refused.
        registry.update_from_discovery(server(
            "b",
            true,
            &["10.0.0.4"],
            ConnectionClass::Discovered,
        ));
        assert_eq!(registry.best_server().unwrap().id().as_str(), "a");
        let seen: Vec<RegistryEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![RegistryEvent::ServerAvailable(ServerId::new("b"))]
        );
        assert_eq!(registry.len(), 2);
    }
}
