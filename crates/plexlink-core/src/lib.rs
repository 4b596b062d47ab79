//! Server registry, connection racing and directory fetching for Plex
//! Media Server clients.
//!
//! - **[`ServerRegistry`]** owns every known [`Server`], merges new
//!   sightings into existing entries, evicts servers whose connections all
//!   vanished, and tracks the single best server. Changes are broadcast as
//!   [`RegistryEvent`]s.
//!
//! - **Reachability**: [`Server::update_reachability`] probes all of a
//!   server's [`Connection`]s concurrently and picks the active one
//!   (first success, local beats remote) under a hard ceiling.
//!
//! - **[`DirectoryFetcher`]** / **[`PlexDirectory`]** fetch a directory
//!   through the active connection, convert it into a [`Listing`], and
//!   enrich `/children` listings with data from their parent.
//!
//! - **[`PlexClient`]** bundles the above with GDM discovery, manual
//!   servers, the [`ServerDataLoader`] and registry persistence.

pub mod client;
pub mod config;
pub mod convert;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod model;
pub mod persist;
pub mod reachability;
pub mod registry;
pub mod url;

mod lock;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::PlexClient;
pub use config::{ClientConfig, ManualServer, TlsVerification};
pub use directory::{DirectoryFetcher, PlexDirectory};
pub use error::CoreError;
pub use loader::{LoaderEvent, ServerData, ServerDataLoader};
pub use reachability::{ConnectionProbe, HttpProbe};
pub use registry::{RegistryEvent, ServerFilter, ServerRegistry};
pub use url::PlexUrl;

pub use model::{
    ArtRole, Artwork, Connection, ConnectionClass, DirectoryType, Entry, Listing, MediaKind,
    MediaRecord, Mechanisms, Properties, Server, ServerDetails, ServerId, Value,
};
