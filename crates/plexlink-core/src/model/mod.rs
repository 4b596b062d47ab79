// ── Domain model ──
//
// Servers, their candidate connections, and the typed listings fetched
// from them. Everything here is shared by the registry, the reachability
// race and the directory fetcher.

pub mod connection;
pub mod listing;
pub mod server;

// ── Re-exports ──────────────────────────────────────────────────────

pub use connection::{
    ACCESS_TOKEN_PARAMETER, Connection, ConnectionClass, Mechanisms, is_local_address,
};
pub use listing::{
    ArtRole, Artwork, DirectoryType, Entry, Listing, MediaKind, MediaRecord, Properties, Value,
};
pub use server::{PLEX_URL_SCHEME, SERVER_CLASS_SECONDARY, Server, ServerDetails, ServerId};
