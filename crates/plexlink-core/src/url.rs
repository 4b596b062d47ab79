// ── Server-addressed URLs ──
//
// Callers name a server, not an address: `plexserver://<id>/<path>?<query>`.
// The host may also be `ip:port`, in which case the registry resolves the
// server by connection address instead of by identifier.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use url::Url;

use crate::error::CoreError;
use crate::model::{PLEX_URL_SCHEME, ServerId};

/// Default media server port, used when an IP host carries none.
pub const DEFAULT_SERVER_PORT: u16 = 32400;

const CHILDREN_SUFFIX: &str = "/children";

/// A validated `plexserver://` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlexUrl(Url);

/// How the host component of a `PlexUrl` names its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRef<'a> {
    Id(&'a str),
    Address { host: &'a str, port: u16 },
}

impl PlexUrl {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let url = Url::parse(raw).map_err(|e| CoreError::InvalidUrl {
            message: format!("{raw}: {e}"),
        })?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> Result<Self, CoreError> {
        if url.scheme() != PLEX_URL_SCHEME {
            return Err(CoreError::InvalidUrl {
                message: format!("{url}: expected a {PLEX_URL_SCHEME}:// URL"),
            });
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(CoreError::InvalidUrl {
                message: format!("{url}: missing server"),
            });
        }
        Ok(Self(url))
    }

    /// URL for `path` on the server with identifier `id`.
    pub fn for_server(id: &ServerId, path: &str) -> Result<Self, CoreError> {
        let path = path.trim_start_matches('/');
        Self::parse(&format!("{PLEX_URL_SCHEME}://{id}/{path}"))
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.0.port()
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.0.query()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// How to look up the server this URL addresses.
    pub fn server_ref(&self) -> ServerRef<'_> {
        let host = self.host();
        match (self.port(), host.parse::<IpAddr>().is_ok()) {
            (Some(port), _) => ServerRef::Address { host, port },
            (None, true) => ServerRef::Address {
                host,
                port: DEFAULT_SERVER_PORT,
            },
            (None, false) => ServerRef::Id(host),
        }
    }

    /// Whether the path asks for the children of an item.
    pub fn is_children(&self) -> bool {
        self.path().trim_end_matches('/').ends_with(CHILDREN_SUFFIX)
    }

    /// The parent item of a `/children` URL (suffix stripped, query kept).
    pub fn augmentation_url(&self) -> Option<PlexUrl> {
        let parent = self
            .path()
            .trim_end_matches('/')
            .strip_suffix(CHILDREN_SUFFIX)?
            .to_owned();
        let mut url = self.0.clone();
        url.set_path(&parent);
        Some(Self(url))
    }

    /// Resolve a document key against this URL.
    ///
    /// Full URLs are kept, absolute keys stay on the same server, and
    /// relative keys are appended to the request path.
    pub fn resolve_key(&self, key: &str) -> String {
        if key.contains("://") {
            return key.to_owned();
        }

        let mut base = self.0.clone();
        base.set_query(None);
        base.set_fragment(None);
        if !key.starts_with('/') && !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }

        base.join(key)
            .map_or_else(|_| key.to_owned(), |url| url.to_string())
    }
}

impl fmt::Display for PlexUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for PlexUrl {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(raw: &str) -> PlexUrl {
        PlexUrl::parse(raw).unwrap()
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(PlexUrl::parse("http://abc/library").is_err());
        assert!(PlexUrl::parse("not a url").is_err());
    }

    #[test]
    fn server_ref_by_id_or_address() {
        assert_eq!(url("plexserver://abc123/library").server_ref(), ServerRef::Id("abc123"));
        assert_eq!(
            url("plexserver://10.0.0.2:32401/library").server_ref(),
            ServerRef::Address {
                host: "10.0.0.2",
                port: 32401
            }
        );
        assert_eq!(
            url("plexserver://10.0.0.2/library").server_ref(),
            ServerRef::Address {
                host: "10.0.0.2",
                port: DEFAULT_SERVER_PORT
            }
        );
    }

    #[test]
    fn children_strip_to_parent() {
        let children = url("plexserver://abc/library/metadata/10/children?x=1");
        assert!(children.is_children());

        let parent = children.augmentation_url().unwrap();
        assert_eq!(parent.as_str(), "plexserver://abc/library/metadata/10?x=1");
        assert!(!parent.is_children());
        assert!(parent.augmentation_url().is_none());
    }

    #[test]
    fn resolves_keys() {
        let base = url("plexserver://abc/library/sections?type=1");

        assert_eq!(base.resolve_key("1"), "plexserver://abc/library/sections/1");
        assert_eq!(
            base.resolve_key("/library/metadata/5"),
            "plexserver://abc/library/metadata/5"
        );
        assert_eq!(
            base.resolve_key("http://example.com/a.jpg"),
            "http://example.com/a.jpg"
        );
    }

    #[test]
    fn for_server_builds_plex_url() {
        let id = ServerId::new("abc");
        assert_eq!(
            PlexUrl::for_server(&id, "/library/sections").unwrap().as_str(),
            "plexserver://abc/library/sections"
        );
    }
}
