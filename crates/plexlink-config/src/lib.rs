//! Configuration for plexlink.
//!
//! TOML file + environment loading, per-server token resolution
//! (env + keyring + plaintext), and translation to
//! `plexlink_core::ClientConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use plexlink_api::ClientIdentity;
use plexlink_core::{ClientConfig, ManualServer, TlsVerification};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEYRING_SERVICE: &str = "plexlink";
const STATE_FILE: &str = "servers.json";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no server named '{name}' in config")]
    UnknownServer { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Stable identifier announced to servers; generated on first save.
    pub client_identifier: Option<String>,

    /// Device name announced to servers (defaults to the host name).
    pub device_name: Option<String>,

    /// Where the server registry is persisted. Defaults to the platform
    /// data directory.
    pub state_file: Option<PathBuf>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Manually entered servers, by name.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Accept any TLS certificate.
    #[serde(default)]
    pub insecure: bool,

    /// Custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Per-connection probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,

    /// Run LAN discovery before server commands.
    #[serde(default = "default_true")]
    pub discovery: bool,

    /// How long to collect discovery replies, in milliseconds.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    #[serde(default = "default_workers")]
    pub augmentation_workers: usize,

    #[serde(default = "default_workers")]
    pub loader_workers: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            ca_cert: None,
            timeout: default_timeout(),
            probe_timeout: default_probe_timeout(),
            discovery: true,
            discovery_timeout_ms: default_discovery_timeout_ms(),
            augmentation_workers: default_workers(),
            loader_workers: default_workers(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_discovery_timeout_ms() -> u64 {
    2000
}
fn default_workers() -> usize {
    4
}

/// A manually entered server address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerEntry {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// "http" or "https".
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Access token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the access token.
    pub token_env: Option<String>,
}

fn default_port() -> u16 {
    32400
}
fn default_scheme() -> String {
    "http".into()
}

impl ServerEntry {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: default_scheme(),
            token: None,
            token_env: None,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "plexlink", "plexlink")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("plexlink");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the persisted server registry.
pub fn default_state_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join(STATE_FILE),
        |dirs| dirs.data_dir().join(STATE_FILE),
    )
}

// ── Loading & saving ────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `PLEXLINK_`-prefixed environment variables.
///
/// Nested keys use a double underscore: `PLEXLINK_DEFAULTS__TIMEOUT=60`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PLEXLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

impl Config {
    /// Assign a fresh client identifier if none is set.
    /// Returns `true` when one was generated.
    pub fn ensure_client_identifier(&mut self) -> bool {
        if self.client_identifier.as_deref().is_some_and(|id| !id.is_empty()) {
            return false;
        }
        self.client_identifier = Some(uuid::Uuid::new_v4().to_string());
        true
    }

    pub fn server(&self, name: &str) -> Result<&ServerEntry, ConfigError> {
        self.servers.get(name).ok_or_else(|| ConfigError::UnknownServer {
            name: name.to_owned(),
        })
    }
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve a server's access token: `token_env` → keyring → plaintext.
///
/// Servers on the local network usually need no token, so absence is
/// not an error.
pub fn resolve_token(entry: &ServerEntry, name: &str) -> Option<SecretString> {
    // 1. Entry's token_env → env var lookup
    if let Some(ref env_name) = entry.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(key) = keyring::Entry::new(KEYRING_SERVICE, &format!("{name}/token")) {
        if let Ok(secret) = key.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    entry.token.clone().map(SecretString::from)
}

/// Store a server's token in the system keyring.
pub fn store_token(name: &str, token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{name}/token"))
        .and_then(|key| key.set_password(token))
        .map_err(|e| ConfigError::Validation {
            field: "token".into(),
            reason: format!("keyring: {e}"),
        })
}

// ── Translation ─────────────────────────────────────────────────────

fn validate_entry(name: &str, entry: &ServerEntry) -> Result<(), ConfigError> {
    if entry.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: format!("servers.{name}.host"),
            reason: "must not be empty".into(),
        });
    }
    if entry.port == 0 {
        return Err(ConfigError::Validation {
            field: format!("servers.{name}.port"),
            reason: "must be between 1 and 65535".into(),
        });
    }
    if !matches!(entry.scheme.as_str(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: format!("servers.{name}.scheme"),
            reason: format!("expected 'http' or 'https', got '{}'", entry.scheme),
        });
    }
    Ok(())
}

/// A configured server as a core `ManualServer`, token resolved.
pub fn to_manual_server(name: &str, entry: &ServerEntry) -> Result<ManualServer, ConfigError> {
    validate_entry(name, entry)?;
    Ok(ManualServer {
        scheme: entry.scheme.clone(),
        host: entry.host.trim().to_owned(),
        port: entry.port,
        token: resolve_token(entry, name),
    })
}

/// Build a `ClientConfig` from the loaded config.
pub fn to_client_config(cfg: &Config) -> Result<ClientConfig, ConfigError> {
    let defaults = &cfg.defaults;

    let tls = if defaults.insecure {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = defaults.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut identity = ClientIdentity::default();
    if let Some(id) = cfg.client_identifier.as_deref().filter(|id| !id.is_empty()) {
        id.clone_into(&mut identity.client_identifier);
    }
    if let Some(device) = cfg.device_name.as_deref().filter(|d| !d.is_empty()) {
        device.clone_into(&mut identity.device_name);
    } else if let Ok(host) = std::env::var("HOSTNAME") {
        identity.device_name = host;
    }

    let manual_servers = cfg
        .servers
        .iter()
        .map(|(name, entry)| to_manual_server(name, entry))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClientConfig {
        identity,
        tls,
        request_timeout: Duration::from_secs(defaults.timeout),
        probe_timeout: Duration::from_secs(defaults.probe_timeout),
        augmentation_workers: defaults.augmentation_workers.max(1),
        loader_workers: defaults.loader_workers.max(1),
        state_path: Some(cfg.state_file.clone().unwrap_or_else(default_state_path)),
        manual_servers,
        ..ClientConfig::default()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_match_client_defaults() {
        let cfg = to_client_config(&Config::default()).unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.race_ceiling, Duration::from_secs(30));
        assert_eq!(cfg.augmentation_ceiling, Duration::from_secs(5));
        assert_eq!(cfg.tls, TlsVerification::SystemDefaults);
        assert!(cfg.manual_servers.is_empty());
        assert!(cfg.state_path.is_some());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
client_identifier = "abc-123"
state_file = "/tmp/plexlink-state.json"

[defaults]
timeout = 12
insecure = true

[servers.den]
host = "192.168.1.5"
token = "plain"

[servers.attic]
host = "attic.example.com"
port = 443
scheme = "https"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.client_identifier.as_deref(), Some("abc-123"));
        assert_eq!(cfg.defaults.timeout, 12);
        assert_eq!(cfg.defaults.probe_timeout, 10);
        assert_eq!(cfg.servers["den"].port, 32400);
        assert_eq!(cfg.servers["attic"].scheme, "https");

        let client = to_client_config(&cfg).unwrap();
        assert_eq!(client.identity.client_identifier, "abc-123");
        assert_eq!(client.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(client.request_timeout, Duration::from_secs(12));
        assert_eq!(
            client.state_path,
            Some(PathBuf::from("/tmp/plexlink-state.json"))
        );
        // BTreeMap order: attic, den
        assert_eq!(client.manual_servers[0].host, "attic.example.com");
        assert_eq!(client.manual_servers[1].host, "192.168.1.5");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.defaults, Defaults::default());
        assert!(cfg.servers.is_empty());
    }

    #[test]
    fn save_round_trips_and_keeps_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        assert!(cfg.ensure_client_identifier());
        assert!(!cfg.ensure_client_identifier());
        cfg.servers
            .insert("den".into(), ServerEntry::new("192.168.1.5", 32400));
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.client_identifier, cfg.client_identifier);
        assert_eq!(loaded.servers, cfg.servers);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let mut bad_scheme = ServerEntry::new("den", 32400);
        bad_scheme.scheme = "ftp".into();
        assert!(matches!(
            to_manual_server("den", &bad_scheme),
            Err(ConfigError::Validation { .. })
        ));
        assert!(to_manual_server("den", &ServerEntry::new("  ", 32400)).is_err());
        assert!(to_manual_server("den", &ServerEntry::new("den", 0)).is_err());
    }

    #[test]
    fn plaintext_token_is_last_resort() {
        let mut entry = ServerEntry::new("192.168.1.5", 32400);
        entry.token_env = Some("PLEXLINK_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        entry.token = Some("plain".into());

        let token = resolve_token(&entry, "plexlink-test-nonexistent").unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }

    #[test]
    fn unknown_server_lookup_fails() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.server("nope"),
            Err(ConfigError::UnknownServer { .. })
        ));
    }
}
