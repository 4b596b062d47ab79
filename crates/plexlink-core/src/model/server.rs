// ── Server: a stable identity reachable through several connections ──
//
// A `Server` is never replaced once registered: later sightings are folded
// in with `merge`, so every `Arc<Server>` handed out keeps seeing updates.
// Descriptive fields live behind an `ArcSwap` for wait-free reads; the
// connection set and race bookkeeping each sit behind their own mutex.

use std::fmt;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use plexlink_api::XmlElement;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use url::Url;

use super::connection::{ACCESS_TOKEN_PARAMETER, Connection, Mechanisms, has_token_parameter};
use crate::error::CoreError;
use crate::lock::lock;

/// Scheme of server-addressed URLs (`plexserver://<id>/<path>`).
pub const PLEX_URL_SCHEME: &str = "plexserver";

/// Server class marking a secondary (non-primary) server.
pub const SERVER_CLASS_SECONDARY: &str = "secondary";

// ── Identity ─────────────────────────────────────────────────────────

/// Opaque, immutable server identifier (the merge key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ── Descriptive fields ───────────────────────────────────────────────

/// Everything about a server except its identity and connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerDetails {
    pub name: String,
    pub owned: bool,
    pub owner: String,
    pub version: String,
    pub server_class: String,
    pub supports_deletion: bool,
    pub supports_audio_transcoding: bool,
    pub supports_video_transcoding: bool,
    pub transcoder_qualities: Vec<String>,
    pub transcoder_bitrates: Vec<String>,
    pub transcoder_resolutions: Vec<String>,
}

impl ServerDetails {
    pub fn named(name: impl Into<String>, owned: bool) -> Self {
        Self {
            name: name.into(),
            owned,
            ..Self::default()
        }
    }

    pub fn is_secondary(&self) -> bool {
        self.server_class.eq_ignore_ascii_case(SERVER_CLASS_SECONDARY)
    }
}

// ── Race bookkeeping ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct RaceState {
    pub(crate) best: Option<Arc<Connection>>,
    pub(crate) active: Option<Arc<Connection>>,
    pub(crate) outstanding: usize,
    pub(crate) complete: bool,
    pub(crate) cycle: u64,
}

// ── Server ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Server {
    id: ServerId,
    details: ArcSwap<ServerDetails>,
    connections: Mutex<Vec<Arc<Connection>>>,
    pub(crate) race: Mutex<RaceState>,
    pub(crate) race_done: Notify,
    pub(crate) race_gate: tokio::sync::Mutex<()>,
}

impl Server {
    pub fn new(id: impl Into<ServerId>, details: ServerDetails) -> Self {
        Self {
            id: id.into(),
            details: ArcSwap::from_pointee(details),
            connections: Mutex::new(Vec::new()),
            race: Mutex::new(RaceState::default()),
            race_done: Notify::new(),
            race_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Builder-style constructor for a server with a known connection set.
    #[must_use]
    pub fn with_connections(self, connections: impl IntoIterator<Item = Connection>) -> Self {
        for conn in connections {
            self.add_connection(Arc::new(conn));
        }
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    pub fn details(&self) -> Arc<ServerDetails> {
        self.details.load_full()
    }

    pub fn name(&self) -> String {
        self.details.load().name.clone()
    }

    pub fn is_owned(&self) -> bool {
        self.details.load().owned
    }

    pub fn is_secondary(&self) -> bool {
        self.details.load().is_secondary()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        lock(&self.connections).clone()
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn active_connection(&self) -> Option<Arc<Connection>> {
        lock(&self.race).active.clone()
    }

    pub fn best_connection(&self) -> Option<Arc<Connection>> {
        lock(&self.race).best.clone()
    }

    pub fn has_active_local_connection(&self) -> bool {
        self.active_connection().is_some_and(|c| c.is_local())
    }

    /// Whether any connection of this server carries an access token.
    pub fn has_auth_token(&self) -> bool {
        lock(&self.connections).iter().any(|c| c.has_token())
    }

    pub fn find_connection(&self, host: &str, port: u16) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .iter()
            .find(|c| c.matches(host, port))
            .cloned()
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Append a connection.
    ///
    /// A local active connection is dropped when the newcomer brings the
    /// server its first token, so the next race can settle on an
    /// authorised address.
    pub fn add_connection(&self, connection: Arc<Connection>) {
        if connection.has_token() && !self.has_auth_token() {
            let mut race = lock(&self.race);
            if race.active.as_ref().is_some_and(|a| a.is_local()) {
                debug!(server = %self.id, "resetting local active connection for new token");
                race.active = None;
            }
        }
        lock(&self.connections).push(connection);
    }

    /// Fold another record of the same server into this one.
    ///
    /// Display fields are copied; each incoming connection is merged into
    /// an existing one with the same address, or appended.
    pub fn merge(&self, other: &Server) {
        let incoming = other.details();
        self.details.rcu(|current| {
            let mut next = ServerDetails::clone(current);
            next.name.clone_from(&incoming.name);
            next.owned = incoming.owned;
            next.owner.clone_from(&incoming.owner);
            if !incoming.version.is_empty() {
                next.version.clone_from(&incoming.version);
            }
            next
        });

        for conn in other.connections() {
            match self.find_connection(conn.host(), conn.port()) {
                Some(existing) if !Arc::ptr_eq(&existing, &conn) => existing.merge(&conn),
                Some(existing) => existing.set_refreshed(true),
                None => self.add_connection(conn),
            }
        }
    }

    /// Clear the refreshed flag on every connection before an update pass.
    pub fn mark_as_refreshing(&self) {
        for conn in lock(&self.connections).iter() {
            conn.set_refreshed(false);
        }
    }

    /// Close an update pass for `mechanism`.
    ///
    /// Connections left with no vouching mechanism are removed (clearing
    /// active/best if they pointed at them). Returns `true` when the server
    /// has no connections left and should be evicted.
    pub fn mark_update_finished(&self, mechanism: Mechanisms) -> bool {
        let removed: Vec<Arc<Connection>> = {
            let mut connections = lock(&self.connections);
            let (gone, kept): (Vec<_>, Vec<_>) = connections
                .drain(..)
                .partition(|c| c.finish_update(mechanism));
            *connections = kept;
            gone
        };

        if !removed.is_empty() {
            let mut race = lock(&self.race);
            for conn in &removed {
                info!(server = %self.id, connection = %conn, "removing connection");
                if race.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, conn)) {
                    race.active = None;
                }
                if race.best.as_ref().is_some_and(|b| Arc::ptr_eq(b, conn)) {
                    race.best = None;
                }
            }
        }

        self.connection_count() == 0
    }

    /// Absorb the server's root document after a successful probe.
    ///
    /// Returns `false` if the document belongs to a different machine.
    pub fn collect_data_from_root(&self, root: &XmlElement) -> bool {
        if let Some(machine) = root.attr("machineIdentifier") {
            if machine != self.id.as_str() {
                warn!(
                    server = %self.id,
                    found = machine,
                    "root document belongs to a different server"
                );
                return false;
            }
        }

        let flag = |name: &str| root.attr(name).is_some_and(|v| v == "1");
        let list = |name: &str| -> Vec<String> {
            root.attr(name)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default()
        };

        let supports_deletion = flag("allowMediaDeletion");
        let supports_audio_transcoding = flag("transcoderAudio");
        let supports_video_transcoding = flag("transcoderVideo");
        let server_class = root.attr("serverClass").map(str::to_owned);
        let version = root.attr("version").map(str::to_owned);
        let qualities = list("transcoderVideoQualities");
        let bitrates = list("transcoderVideoBitrates");
        let resolutions = list("transcoderVideoResolutions");

        self.details.rcu(|current| {
            let mut next = ServerDetails::clone(current);
            next.supports_deletion = supports_deletion;
            next.supports_audio_transcoding = supports_audio_transcoding;
            next.supports_video_transcoding = supports_video_transcoding;
            next.server_class = server_class.clone().unwrap_or_default();
            if let Some(version) = &version {
                next.version.clone_from(version);
            }
            next.transcoder_qualities.clone_from(&qualities);
            next.transcoder_bitrates.clone_from(&bitrates);
            next.transcoder_resolutions.clone_from(&resolutions);
            next
        });
        true
    }

    // ── URLs ─────────────────────────────────────────────────────────

    /// Request URL for `path` on the active connection, or on any
    /// connection when none is active yet.
    pub fn build_url(&self, path: &str, query: Option<&str>) -> Result<Url, CoreError> {
        let connection = self
            .active_connection()
            .or_else(|| lock(&self.connections).first().cloned())
            .ok_or_else(|| CoreError::NoConnection {
                identifier: self.id.to_string(),
            })?;
        self.url_for(&connection, path, query)
    }

    /// Request URL for `path` on a specific connection.
    ///
    /// A connection without its own token borrows one from any sibling.
    pub fn url_for(
        &self,
        connection: &Connection,
        path: &str,
        query: Option<&str>,
    ) -> Result<Url, CoreError> {
        let mut url = connection.build_url(path, query)?;
        if !has_token_parameter(&url) {
            let shared = lock(&self.connections).iter().find_map(|c| c.token());
            if let Some(token) = shared {
                url.query_pairs_mut()
                    .append_pair(ACCESS_TOKEN_PARAMETER, token.expose_secret());
            }
        }
        Ok(url)
    }

    /// Connection-independent `plexserver://<id>/<path>` URL.
    pub fn build_plex_url(&self, path: &str) -> Result<Url, CoreError> {
        let path = path.trim_start_matches('/');
        let raw = format!("{PLEX_URL_SCHEME}://{}/{path}", self.id);
        Url::parse(&raw).map_err(|e| CoreError::InvalidUrl {
            message: format!("{raw}: {e}"),
        })
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.details.load().name, self.id)
    }
}
