// plexlink-api: HTTP transport and XML document layer for Plex Media Servers

pub mod client;
pub mod document;
pub mod error;
pub mod transport;

pub use client::{PlexHttp, RawResponse};
pub use document::{XmlElement, parse_document};
pub use error::Error;
pub use transport::{ClientIdentity, TlsMode, TransportConfig};
