// ── Registry persistence ──
//
// The registry is saved as one JSON document: a format version, the best
// server id, a timestamp, and one record per server with its connections.
// Records are plain data; conversion to and from live `Server` values
// happens here so the registry never deals with serde types directly.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Connection, ConnectionClass, Server, ServerDetails, ServerId};

/// Current document format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub class: ConnectionClass,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_scheme() -> String {
    "http".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: ServerId,
    #[serde(flatten)]
    pub details: ServerDetails,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_server: Option<ServerId>,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<&Connection> for ConnectionRecord {
    fn from(conn: &Connection) -> Self {
        Self {
            class: conn.class(),
            scheme: conn.scheme().to_owned(),
            host: conn.host().to_owned(),
            port: conn.port(),
            local: conn.is_local(),
            token: conn.token().map(|t| t.expose_secret().to_owned()),
        }
    }
}

impl From<&ConnectionRecord> for Connection {
    fn from(record: &ConnectionRecord) -> Self {
        Connection::new(
            record.class,
            record.scheme.clone(),
            record.host.clone(),
            record.port,
            record.local,
            record.token.clone().map(SecretString::from),
        )
    }
}

impl From<&Server> for ServerRecord {
    fn from(server: &Server) -> Self {
        Self {
            id: server.id().clone(),
            details: ServerDetails::clone(&server.details()),
            connections: server
                .connections()
                .iter()
                .map(|c| ConnectionRecord::from(c.as_ref()))
                .collect(),
        }
    }
}

impl ServerRecord {
    /// Rebuild a live server; `None` if the record has no identifier.
    pub fn into_server(self) -> Option<Arc<Server>> {
        if self.id.as_str().is_empty() {
            return None;
        }
        let server = Server::new(self.id, self.details)
            .with_connections(self.connections.iter().map(Connection::from));
        Some(Arc::new(server))
    }
}

// ── File IO ──────────────────────────────────────────────────────────

impl RegistrySnapshot {
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::State {
            message: format!("cannot serialize registry: {e}"),
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let snapshot: Self = serde_json::from_str(raw).map_err(|e| CoreError::State {
            message: format!("cannot parse registry state: {e}"),
        })?;
        if snapshot.version > FORMAT_VERSION {
            return Err(CoreError::State {
                message: format!(
                    "registry state version {} is newer than supported {FORMAT_VERSION}",
                    snapshot.version
                ),
            });
        }
        Ok(snapshot)
    }

    /// Write to `path`, creating parent directories.
    ///
    /// The document goes to a sibling temp file first and is renamed over
    /// `path`, so an interrupted save leaves the previous state readable.
    pub fn write_to(&self, path: &Path) -> Result<(), CoreError> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| state_io(path, &e))?;
        }

        let tmp = temp_sibling(path);
        let written = std::fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(json.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(state_io(path, &e));
        }
        Ok(())
    }

    /// Read from `path`; a missing file is `Ok(None)`.
    pub fn read_from(path: &Path) -> Result<Option<Self>, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(state_io(path, &e)),
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn state_io(path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::State {
        message: format!("{}: {err}", path.display()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_every_field() {
        let mut details = ServerDetails::named("Den", true);
        details.owner = "alex".into();
        details.version = "0.9.7".into();
        details.server_class = "secondary".into();
        details.supports_video_transcoding = true;
        details.transcoder_bitrates = vec!["64".into(), "96".into()];

        let server = Server::new("abc", details.clone()).with_connections([Connection::new(
            ConnectionClass::Manual,
            "https",
            "10.0.0.2",
            32400,
            true,
            Some(SecretString::from("tok".to_owned())),
        )]);

        let snapshot = RegistrySnapshot {
            version: FORMAT_VERSION,
            best_server: Some(ServerId::new("abc")),
            saved_at: Utc::now(),
            servers: vec![ServerRecord::from(&server)],
        };
        let back = RegistrySnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(back, snapshot);
        let rebuilt = back.servers[0].clone().into_server().unwrap();
        assert_eq!(*rebuilt.details(), details);
        let conn = &rebuilt.connections()[0];
        assert_eq!(conn.scheme(), "https");
        assert_eq!(conn.token().unwrap().expose_secret(), "tok");
    }

    #[test]
    fn rejects_future_version() {
        let raw = r#"{"version": 99, "savedAt": "2024-01-01T00:00:00Z", "servers": []}"#;
        assert!(matches!(
            RegistrySnapshot::from_json(raw),
            Err(CoreError::State { .. })
        ));
    }

    fn snapshot(best: &str) -> RegistrySnapshot {
        RegistrySnapshot {
            version: FORMAT_VERSION,
            best_server: Some(ServerId::new(best)),
            saved_at: Utc::now(),
            servers: Vec::new(),
        }
    }

    #[test]
    fn save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("servers.json");

        snapshot("abc").write_to(&path).unwrap();
        snapshot("def").write_to(&path).unwrap();

        let back = RegistrySnapshot::read_from(&path).unwrap().unwrap();
        assert_eq!(back.best_server, Some(ServerId::new("def")));
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("servers.json")]);
    }

    #[test]
    fn failed_save_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        snapshot("abc").write_to(&path).unwrap();

        // The temp file cannot be created where a directory already sits.
        std::fs::create_dir(temp_sibling(&path)).unwrap();
        assert!(matches!(
            snapshot("def").write_to(&path),
            Err(CoreError::State { .. })
        ));

        let back = RegistrySnapshot::read_from(&path).unwrap().unwrap();
        assert_eq!(back.best_server, Some(ServerId::new("abc")));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(RegistrySnapshot::read_from(&path).unwrap().is_none());
    }
}
