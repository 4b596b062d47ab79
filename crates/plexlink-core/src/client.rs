// ── Client facade ──
//
// Bundles the HTTP transport, server registry, directory fetcher and data
// loader behind one handle, and answers the virtual `plexserver://` hosts
// that are assembled from loaded data instead of fetched.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use plexlink_api::PlexHttp;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ManualServer};
use crate::directory::DirectoryFetcher;
use crate::discovery::{discover_gdm, identify_server};
use crate::error::CoreError;
use crate::loader::ServerDataLoader;
use crate::model::{ConnectionClass, Entry, Listing};
use crate::reachability::{ConnectionProbe, HttpProbe};
use crate::registry::ServerRegistry;
use crate::url::PlexUrl;

/// Virtual host listing every shared section.
pub const SHARED_HOST: &str = "shared";
/// Virtual host listing every loaded channel.
pub const CHANNELS_HOST: &str = "channels";
/// Virtual host forwarding to the best server's channel store.
pub const CHANNEL_DIRECTORY_HOST: &str = "channeldirectory";

const APPSTORE_PATH: &str = "/system/appstore";
const CHANNEL_TYPES: [&str; 3] = ["video", "music", "photos"];

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`.
#[derive(Clone)]
pub struct PlexClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    http: PlexHttp,
    registry: ServerRegistry,
    fetcher: DirectoryFetcher,
    loader: ServerDataLoader,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PlexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlexClient")
            .field("registry", &self.inner.registry)
            .field("loader", &self.inner.loader)
            .finish_non_exhaustive()
    }
}

impl PlexClient {
    /// Build a client that probes connections over HTTP.
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let http = PlexHttp::new(&config.transport())?;
        let probe: Arc<dyn ConnectionProbe> =
            Arc::new(HttpProbe::new(http.clone(), config.probe_timeout));
        Ok(Self::with_probe(config, http, probe))
    }

    /// Build a client with a custom reachability probe.
    pub fn with_probe(
        config: ClientConfig,
        http: PlexHttp,
        probe: Arc<dyn ConnectionProbe>,
    ) -> Self {
        let registry = ServerRegistry::new(probe, config.race_ceiling, config.state_path.clone());
        let fetcher = DirectoryFetcher::new(
            http.clone(),
            registry.clone(),
            config.augmentation_workers,
            config.augmentation_ceiling,
        );
        let loader = ServerDataLoader::new(fetcher.clone(), config.loader_workers);

        Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                registry,
                fetcher,
                loader,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the data loader, restore saved state and identify the
    /// configured manual servers.
    ///
    /// Unreadable saved state is logged and skipped.
    pub async fn start(&self) -> Result<(), CoreError> {
        let loader_task = self.inner.loader.spawn(self.inner.cancel.child_token());
        self.inner.tasks.lock().await.push(loader_task);

        match self.inner.registry.load() {
            Ok(restored) => debug!(restored, "registry state loaded"),
            Err(e) => warn!(error = %e, "ignoring saved registry state"),
        }

        let manual = self.inner.config.manual_servers.clone();
        if !manual.is_empty() {
            self.set_manual_servers(&manual).await?;
        }
        info!(servers = self.inner.registry.len(), "client started");
        Ok(())
    }

    /// Stop background tasks and persist the registry.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.inner.cancel.cancel();
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        self.inner.registry.save()?;
        info!("client shut down");
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.inner.registry
    }

    pub fn fetcher(&self) -> &DirectoryFetcher {
        &self.inner.fetcher
    }

    pub fn loader(&self) -> &ServerDataLoader {
        &self.inner.loader
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Run a GDM search and feed the result to the registry as the
    /// complete set of discovered servers.
    pub async fn discover(&self, timeout: Duration) -> Result<usize, CoreError> {
        let servers = discover_gdm(timeout).await?;
        let found = servers.len();
        self.inner
            .registry
            .update_from_connection_type(servers, ConnectionClass::Discovered)
            .await
            .map_err(|e| CoreError::Internal(format!("discovery update failed: {e}")))?;
        Ok(found)
    }

    /// Identify `servers` and make them the complete set of manual servers.
    ///
    /// Addresses that cannot be identified are logged and left out, so
    /// their previous manual connections are evicted.
    pub async fn set_manual_servers(&self, servers: &[ManualServer]) -> Result<usize, CoreError> {
        let http = &self.inner.http;
        let results = join_all(servers.iter().map(|m| identify_server(http, m))).await;

        let mut identified = Vec::with_capacity(results.len());
        for (manual, result) in servers.iter().zip(results) {
            match result {
                Ok(server) => identified.push(server),
                Err(e) => warn!(
                    host = %manual.host,
                    port = manual.port,
                    error = %e,
                    "manual server not identified"
                ),
            }
        }

        let count = identified.len();
        self.inner
            .registry
            .update_from_connection_type(identified, ConnectionClass::Manual)
            .await
            .map_err(|e| CoreError::Internal(format!("manual server update failed: {e}")))?;
        Ok(count)
    }

    /// Race every server's connections.
    pub async fn update_reachability(&self, force: bool) {
        self.inner.registry.update_reachability(force).await;
    }

    // ── Directories ──────────────────────────────────────────────────

    /// Fetch a directory, answering the virtual hosts locally.
    pub async fn get_directory(&self, url: &PlexUrl) -> Result<Listing, CoreError> {
        match url.host() {
            SHARED_HOST => Ok(self.shared_directory()),
            CHANNELS_HOST => Ok(self.channel_directory()),
            CHANNEL_DIRECTORY_HOST => self.online_channel_directory().await,
            _ => self.inner.fetcher.get_directory(url).await,
        }
    }

    fn shared_directory(&self) -> Listing {
        let registry = &self.inner.registry;
        let entries = self
            .inner
            .loader
            .all_shared_sections()
            .into_iter()
            .filter_map(|section| {
                let server = registry.find_by_id(section.properties.text("serverUUID")?)?;
                let details = server.details();

                let mut entry = Entry {
                    element: section.element.clone(),
                    directory_type: section.directory_type,
                    is_folder: true,
                    path: section.path.clone(),
                    art: section.art.clone(),
                    ..Entry::default()
                };
                if let Some(label) = section.label() {
                    entry.properties.insert("title", label);
                }
                entry.properties.insert("sourceTitle", details.owner.as_str());
                entry.properties.insert("serverName", details.name.as_str());
                entry
                    .properties
                    .insert("machineIdentifier", server.id().as_str());
                Some(entry)
            })
            .collect();

        Listing {
            path: format!("plexserver://{SHARED_HOST}"),
            entries,
            ..Listing::default()
        }
    }

    fn channel_directory(&self) -> Listing {
        let entries = self
            .inner
            .loader
            .all_channels()
            .into_iter()
            .map(|mut channel| {
                if let Some(kind) = channel.path.as_deref().and_then(channel_type) {
                    channel.properties.insert("channelType", kind);
                }
                channel
            })
            .collect();

        Listing {
            path: format!("plexserver://{CHANNELS_HOST}"),
            entries,
            ..Listing::default()
        }
    }

    async fn online_channel_directory(&self) -> Result<Listing, CoreError> {
        let best = self
            .inner
            .registry
            .best_server()
            .ok_or_else(|| CoreError::ServerNotFound {
                identifier: CHANNEL_DIRECTORY_HOST.into(),
            })?;
        let url = PlexUrl::for_server(best.id(), APPSTORE_PATH)?;
        let mut listing = self.inner.fetcher.get_directory(&url).await?;
        listing.path = format!("plexserver://{CHANNEL_DIRECTORY_HOST}");
        Ok(listing)
    }
}

/// Channel kind from the first path segment of a channel key.
fn channel_type(path: &str) -> Option<&'static str> {
    let segment = PlexUrl::parse(path).ok().map_or_else(
        || path.trim_start_matches('/').to_owned(),
        |url| url.path().trim_start_matches('/').to_owned(),
    );
    CHANNEL_TYPES
        .into_iter()
        .find(|kind| segment.starts_with(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_from_path() {
        assert_eq!(channel_type("plexserver://abc/video/trailers"), Some("video"));
        assert_eq!(channel_type("plexserver://abc/music/radio"), Some("music"));
        assert_eq!(channel_type("/photos/flickr"), Some("photos"));
        assert_eq!(channel_type("plexserver://abc/system/apps"), None);
    }
}
