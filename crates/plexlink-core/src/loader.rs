// ── Server data loader ──
//
// Follows registry notifications and keeps each available server's
// catalog root (library sections, and channels for owned servers) in
// memory. Data for a server is discarded as soon as it becomes
// unavailable or is evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::DirectoryFetcher;
use crate::error::CoreError;
use crate::lock::lock;
use crate::model::{Entry, Listing, Server, ServerId};
use crate::registry::RegistryEvent;
use crate::url::PlexUrl;

const EVENT_CHANNEL_SIZE: usize = 256;

const SECTIONS_PATH: &str = "/library/sections";
const CHANNELS_PATH: &str = "/channels/all";

/// Notifications emitted by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    DataLoaded(ServerId),
    DataUnloaded(ServerId),
}

/// Catalog root of one server.
#[derive(Debug, Clone)]
pub struct ServerData {
    pub server: Arc<Server>,
    pub sections: Listing,
    /// Only fetched for owned servers.
    pub channels: Option<Listing>,
}

impl ServerData {
    /// Copy of `entry` tagged with this server's name and id.
    fn annotate(&self, entry: &Entry) -> Entry {
        let mut entry = entry.clone();
        entry.properties.insert("serverName", self.server.name());
        entry
            .properties
            .insert("serverUUID", self.server.id().as_str());
        entry
    }
}

/// Loads and caches per-server catalog roots.
///
/// Cheaply cloneable via `Arc<LoaderInner>`.
#[derive(Clone)]
pub struct ServerDataLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    fetcher: DirectoryFetcher,
    data: DashMap<ServerId, Arc<ServerData>>,
    /// Bumped on every unload; a load started under an older value is stale.
    generations: Mutex<HashMap<ServerId, u64>>,
    pool: Semaphore,
    events: broadcast::Sender<LoaderEvent>,
}

impl std::fmt::Debug for ServerDataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDataLoader")
            .field("servers", &self.inner.data.len())
            .finish_non_exhaustive()
    }
}

impl ServerDataLoader {
    pub fn new(fetcher: DirectoryFetcher, workers: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                data: DashMap::new(),
                generations: Mutex::new(HashMap::new()),
                pool: Semaphore::new(workers.max(1)),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.inner.events.subscribe()
    }

    fn notify(&self, event: LoaderEvent) {
        debug!(?event, "loader notification");
        let _ = self.inner.events.send(event);
    }

    /// Follow registry notifications until `cancel` fires.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.inner.fetcher.registry().subscribe();
        let loader = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = rx.recv() => match result {
                        Ok(event) => loader.handle_registry_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "data loader: registry receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("data loader stopped");
        })
    }

    fn handle_registry_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::ServerAvailable(id) => {
                let Some(server) = self.inner.fetcher.registry().find_by_id(id.as_str()) else {
                    return;
                };
                let generation = self.generation(id);
                let loader = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = loader.load_at(&server, generation).await {
                        warn!(server = %server.id(), error = %e, "loading server data failed");
                    }
                });
            }
            RegistryEvent::ServerUnavailable(id) | RegistryEvent::ServerRemoved(id) => {
                self.unload(id);
            }
            RegistryEvent::BestServerChanged(_) | RegistryEvent::BestServerCleared => {}
        }
    }

    fn generation(&self, id: &ServerId) -> u64 {
        lock(&self.inner.generations).get(id).copied().unwrap_or(0)
    }

    /// Fetch the catalog root of `server` and store it.
    ///
    /// A failed channel fetch is not fatal; the sections are still kept.
    /// If the server is unloaded while the fetch is in flight, the result
    /// is dropped.
    pub async fn load(&self, server: &Arc<Server>) -> Result<(), CoreError> {
        self.load_at(server, self.generation(server.id())).await
    }

    async fn load_at(&self, server: &Arc<Server>, generation: u64) -> Result<(), CoreError> {
        let _permit = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|_| CoreError::Cancelled)?;

        let fetcher = &self.inner.fetcher;
        let sections = fetcher
            .fetch_listing(&PlexUrl::for_server(server.id(), SECTIONS_PATH)?, None)
            .await?;

        let channels = if server.is_owned() {
            let url = PlexUrl::for_server(server.id(), CHANNELS_PATH)?;
            match fetcher.fetch_listing(&url, None).await {
                Ok(listing) => Some(listing),
                Err(e) => {
                    debug!(server = %server.id(), error = %e, "no channels");
                    None
                }
            }
        } else {
            None
        };

        {
            let generations = lock(&self.inner.generations);
            if generations.get(server.id()).copied().unwrap_or(0) != generation {
                debug!(server = %server.id(), "server went away during load, dropping data");
                return Ok(());
            }
            info!(
                server = %server.id(),
                sections = sections.len(),
                channels = channels.as_ref().map_or(0, Listing::len),
                "server data loaded"
            );
            self.inner.data.insert(
                server.id().clone(),
                Arc::new(ServerData {
                    server: Arc::clone(server),
                    sections,
                    channels,
                }),
            );
        }
        self.notify(LoaderEvent::DataLoaded(server.id().clone()));
        Ok(())
    }

    /// Discard data for `id`. Returns `true` if anything was stored.
    ///
    /// Loads still in flight for `id` are invalidated either way.
    pub fn unload(&self, id: &ServerId) -> bool {
        let removed = {
            let mut generations = lock(&self.inner.generations);
            *generations.entry(id.clone()).or_insert(0) += 1;
            self.inner.data.remove(id)
        };
        if removed.is_none() {
            return false;
        }
        info!(server = %id, "server data unloaded");
        self.notify(LoaderEvent::DataUnloaded(id.clone()));
        true
    }

    pub fn server_data(&self, id: &ServerId) -> Option<Arc<ServerData>> {
        self.inner.data.get(id).map(|d| Arc::clone(d.value()))
    }

    pub fn sections(&self, id: &ServerId) -> Option<Listing> {
        self.server_data(id).map(|d| d.sections.clone())
    }

    pub fn is_loaded(&self, id: &ServerId) -> bool {
        self.inner.data.contains_key(id)
    }

    /// Stored data, ordered by server id.
    fn snapshot(&self) -> Vec<Arc<ServerData>> {
        let mut all: Vec<_> = self
            .inner
            .data
            .iter()
            .map(|d| Arc::clone(d.value()))
            .collect();
        all.sort_by(|a, b| a.server.id().cmp(b.server.id()));
        all
    }

    pub fn all_owned_sections(&self) -> Vec<Entry> {
        self.snapshot()
            .iter()
            .filter(|d| d.server.is_owned())
            .flat_map(|d| d.sections.entries.iter().map(move |e| d.annotate(e)))
            .collect()
    }

    /// Sections of servers shared with us, tagged with their server.
    pub fn all_shared_sections(&self) -> Vec<Entry> {
        self.snapshot()
            .iter()
            .filter(|d| !d.server.is_owned())
            .flat_map(|d| d.sections.entries.iter().map(move |e| d.annotate(e)))
            .collect()
    }

    pub fn all_channels(&self) -> Vec<Entry> {
        self.snapshot()
            .iter()
            .filter_map(|d| d.channels.as_ref().map(|c| (d, c)))
            .flat_map(|(d, channels)| channels.entries.iter().map(move |e| d.annotate(e)))
            .collect()
    }
}
