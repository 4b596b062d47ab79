// ── Connection: one candidate address for a server ──

use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::error::CoreError;
use crate::lock::lock;

/// Query parameter carrying the access token on every request.
pub const ACCESS_TOKEN_PARAMETER: &str = "X-Plex-Token";

/// How a connection came to be known.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionClass {
    /// Entered by hand.
    Manual,
    /// Found on the local network.
    Discovered,
    /// Handed out by the account service.
    Account,
}

impl ConnectionClass {
    pub fn mechanism(self) -> Mechanisms {
        match self {
            Self::Manual => Mechanisms::MANUAL,
            Self::Discovered => Mechanisms::DISCOVERED,
            Self::Account => Mechanisms::ACCOUNT,
        }
    }
}

/// Set of discovery mechanisms currently vouching for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Mechanisms(u8);

impl Mechanisms {
    pub const NONE: Self = Self(0);
    pub const MANUAL: Self = Self(0b001);
    pub const DISCOVERED: Self = Self(0b010);
    pub const ACCOUNT: Self = Self(0b100);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl From<ConnectionClass> for Mechanisms {
    fn from(class: ConnectionClass) -> Self {
        class.mechanism()
    }
}

#[derive(Debug)]
struct ConnectionState {
    token: Option<SecretString>,
    refreshed: bool,
    mechanisms: Mechanisms,
}

/// One candidate network address (plus optional credential) for a server.
///
/// Address fields are fixed at creation; the token, refreshed flag and
/// mechanism set change as discovery sources report the connection again.
/// Shared as `Arc<Connection>` between a server, in-flight probes and
/// callers holding the active connection.
#[derive(Debug)]
pub struct Connection {
    scheme: String,
    host: String,
    port: u16,
    local: bool,
    class: ConnectionClass,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(
        class: ConnectionClass,
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        local: bool,
        token: Option<SecretString>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            local,
            class,
            state: Mutex::new(ConnectionState {
                token: token.filter(|t| !t.expose_secret().is_empty()),
                refreshed: true,
                mechanisms: class.mechanism(),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn class(&self) -> ConnectionClass {
        self.class
    }

    pub fn token(&self) -> Option<SecretString> {
        lock(&self.state).token.clone()
    }

    pub fn has_token(&self) -> bool {
        lock(&self.state).token.is_some()
    }

    pub fn mechanisms(&self) -> Mechanisms {
        lock(&self.state).mechanisms
    }

    pub fn is_refreshed(&self) -> bool {
        lock(&self.state).refreshed
    }

    pub fn set_refreshed(&self, refreshed: bool) {
        lock(&self.state).refreshed = refreshed;
    }

    /// Same endpoint: host (ASCII case-insensitive) and port.
    pub fn same_address(&self, other: &Connection) -> bool {
        self.matches(&other.host, other.port)
    }

    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host.eq_ignore_ascii_case(host)
    }

    // ── Update cycle ─────────────────────────────────────────────────

    /// Fold a re-reported copy of this connection into it.
    ///
    /// Mechanisms are OR-ed, a missing token is adopted, and the connection
    /// counts as refreshed for the current update pass.
    pub fn merge(&self, other: &Connection) {
        let incoming_token = other.token();
        let incoming_mechanisms = other.mechanisms();

        let mut state = lock(&self.state);
        state.mechanisms = state.mechanisms.union(incoming_mechanisms);
        if state.token.is_none() {
            state.token = incoming_token;
        }
        state.refreshed = true;
    }

    /// Withdraw `mechanism` unless this connection was refreshed in the
    /// current pass. Returns `true` if no mechanism vouches for it anymore.
    pub fn finish_update(&self, mechanism: Mechanisms) -> bool {
        let mut state = lock(&self.state);
        if !state.refreshed {
            state.mechanisms = state.mechanisms.without(mechanism);
        }
        state.mechanisms.is_empty()
    }

    // ── URLs ─────────────────────────────────────────────────────────

    /// Base URL of this connection (`scheme://host:port/`).
    pub fn base_url(&self) -> Result<Url, CoreError> {
        let host = match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => self.host.clone(),
        };
        let raw = format!("{}://{}:{}/", self.scheme, host, self.port);
        Url::parse(&raw).map_err(|e| CoreError::InvalidUrl {
            message: format!("{raw}: {e}"),
        })
    }

    /// Absolute request URL for `path` (and optional `query`) on this
    /// connection, carrying this connection's own token if it has one.
    pub fn build_url(&self, path: &str, query: Option<&str>) -> Result<Url, CoreError> {
        let mut url = self.base_url()?;
        url.set_path(path);
        url.set_query(query.filter(|q| !q.is_empty()));
        if let Some(token) = self.token() {
            if !has_token_parameter(&url) {
                url.query_pairs_mut()
                    .append_pair(ACCESS_TOKEN_PARAMETER, token.expose_secret());
            }
        }
        Ok(url)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Whether `url` already carries an access-token query parameter.
pub fn has_token_parameter(url: &Url) -> bool {
    url.query_pairs().any(|(k, _)| k == ACCESS_TOKEN_PARAMETER)
}

/// Best-effort locality guess for an address without discovery context.
pub fn is_local_address(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn conn(class: ConnectionClass, host: &str, token: Option<&str>) -> Connection {
        Connection::new(
            class,
            "http",
            host,
            32400,
            true,
            token.map(|t| SecretString::from(t.to_owned())),
        )
    }

    #[test]
    fn equality_ignores_host_case() {
        let a = conn(ConnectionClass::Manual, "Plex.LAN", None);
        let b = conn(ConnectionClass::Discovered, "plex.lan", None);
        assert!(a.same_address(&b));
        assert!(!a.matches("plex.lan", 32401));
    }

    #[test]
    fn merge_ors_mechanisms_and_adopts_token() {
        let a = conn(ConnectionClass::Manual, "10.0.0.2", None);
        let b = conn(ConnectionClass::Account, "10.0.0.2", Some("abc"));
        a.set_refreshed(false);

        a.merge(&b);

        assert!(a.mechanisms().contains(Mechanisms::MANUAL));
        assert!(a.mechanisms().contains(Mechanisms::ACCOUNT));
        assert_eq!(a.token().unwrap().expose_secret(), "abc");
        assert!(a.is_refreshed());
    }

    #[test]
    fn merge_keeps_existing_token() {
        let a = conn(ConnectionClass::Manual, "10.0.0.2", Some("mine"));
        let b = conn(ConnectionClass::Account, "10.0.0.2", Some("theirs"));
        a.merge(&b);
        assert_eq!(a.token().unwrap().expose_secret(), "mine");
    }

    #[test]
    fn finish_update_drops_unrefreshed_mechanism() {
        let a = conn(ConnectionClass::Discovered, "10.0.0.2", None);
        a.merge(&conn(ConnectionClass::Manual, "10.0.0.2", None));

        a.set_refreshed(false);
        assert!(!a.finish_update(Mechanisms::DISCOVERED));
        assert_eq!(a.mechanisms(), Mechanisms::MANUAL);

        assert!(a.finish_update(Mechanisms::MANUAL));
    }

    #[test]
    fn finish_update_keeps_refreshed_connection() {
        let a = conn(ConnectionClass::Discovered, "10.0.0.2", None);
        assert!(!a.finish_update(Mechanisms::DISCOVERED));
        assert_eq!(a.mechanisms(), Mechanisms::DISCOVERED);
    }

    #[test]
    fn build_url_appends_token() {
        let a = conn(ConnectionClass::Manual, "10.0.0.2", Some("tok"));
        let url = a.build_url("/library/sections", Some("type=1")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://10.0.0.2:32400/library/sections?type=1&X-Plex-Token=tok"
        );
    }

    #[test]
    fn build_url_brackets_ipv6() {
        let a = conn(ConnectionClass::Discovered, "fe80::1", None);
        let url = a.build_url("/", None).unwrap();
        assert_eq!(url.as_str(), "http://[fe80::1]:32400/");
    }

    #[test]
    fn empty_token_is_no_token() {
        let a = conn(ConnectionClass::Manual, "10.0.0.2", Some(""));
        assert!(!a.has_token());
    }

    #[test]
    fn locality_from_address() {
        assert!(is_local_address("192.168.1.10"));
        assert!(is_local_address("127.0.0.1"));
        assert!(is_local_address("localhost"));
        assert!(!is_local_address("8.8.8.8"));
        assert!(!is_local_address("my.plexapp.com"));
    }
}
