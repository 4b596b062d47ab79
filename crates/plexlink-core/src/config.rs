// ── Runtime client configuration ──
//
// These types describe *how* the client talks to media servers: identity,
// TLS, timeouts, worker counts and manual addresses. They never touch disk.
// The CLI (via plexlink-config) constructs a `ClientConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use plexlink_api::{ClientIdentity, TlsMode, TransportConfig};
use secrecy::SecretString;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed certs on LAN servers).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// A server address entered by hand rather than discovered.
#[derive(Debug, Clone)]
pub struct ManualServer {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub token: Option<SecretString>,
}

impl ManualServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "http".into(),
            host: host.into(),
            port,
            token: None,
        }
    }
}

/// Configuration for a client session.
///
/// Built by the CLI, passed to `PlexClient` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity announced in `X-Plex-*` headers.
    pub identity: ClientIdentity,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Per-request timeout for directory fetches.
    pub request_timeout: Duration,
    /// Per-probe timeout for reachability checks.
    pub probe_timeout: Duration,
    /// Hard ceiling on one reachability race.
    pub race_ceiling: Duration,
    /// Hard ceiling on waiting for augmentations of one fetch.
    pub augmentation_ceiling: Duration,
    /// Concurrent augmentation jobs across all fetches.
    pub augmentation_workers: usize,
    /// Concurrent section/channel loads.
    pub loader_workers: usize,
    /// Where the registry is persisted between runs, if anywhere.
    pub state_path: Option<PathBuf>,
    /// Servers entered by hand.
    pub manual_servers: Vec<ManualServer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity: ClientIdentity::default(),
            tls: TlsVerification::default(),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            race_ceiling: Duration::from_secs(30),
            augmentation_ceiling: Duration::from_secs(5),
            augmentation_workers: 4,
            loader_workers: 4,
            state_path: None,
            manual_servers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Transport settings for the shared HTTP client.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.request_timeout,
            identity: self.identity.clone(),
        }
    }
}
