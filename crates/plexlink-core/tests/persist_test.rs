#![allow(clippy::unwrap_used)]
// Registry save/load tests using temporary state files.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use tokio_test::assert_ok;

use plexlink_core::persist::RegistrySnapshot;
use plexlink_core::{
    Connection, ConnectionClass, ConnectionProbe, CoreError, RegistryEvent, Server, ServerDetails,
    ServerRegistry,
};

struct NeverProbe;

impl ConnectionProbe for NeverProbe {
    fn probe(&self, _: Arc<Server>, _: Arc<Connection>) -> BoxFuture<'static, bool> {
        async { false }.boxed()
    }
}

fn registry_at(path: &std::path::Path) -> ServerRegistry {
    ServerRegistry::new(
        Arc::new(NeverProbe),
        Duration::from_secs(1),
        Some(path.to_path_buf()),
    )
}

fn den() -> Arc<Server> {
    let mut details = ServerDetails::named("Den", true);
    details.owner = "alex".into();
    details.version = "1.2.3".into();
    details.supports_audio_transcoding = true;

    Arc::new(Server::new("abc", details).with_connections([
        Connection::new(
            ConnectionClass::Manual,
            "http",
            "192.168.1.5",
            32400,
            true,
            Some(SecretString::from("secret".to_owned())),
        ),
        Connection::new(
            ConnectionClass::Account,
            "https",
            "203.0.113.9",
            443,
            false,
            None,
        ),
    ]))
}

#[test]
fn save_then_load_restores_servers_and_best() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("servers.json");

    let original = registry_at(&path);
    let den = original.merge_server(den());
    let attic = original.merge_server(Arc::new(Server::new(
        "xyz",
        ServerDetails::named("Attic", true),
    )
    .with_connections([Connection::new(
        ConnectionClass::Discovered,
        "http",
        "192.168.1.6",
        32400,
        true,
        None,
    )])));
    assert!(original.set_best_server(&den, false));
    assert!(!original.set_best_server(&attic, false));
    assert_ok!(original.save());

    let restored = registry_at(&path);
    let mut events = restored.subscribe();
    assert_eq!(restored.load().unwrap(), 2);

    let server = restored.find_by_id("abc").unwrap();
    assert_eq!(server.name(), "Den");
    assert_eq!(server.details().owner, "alex");
    assert_eq!(server.details().version, "1.2.3");
    assert!(server.details().supports_audio_transcoding);
    assert_eq!(server.connection_count(), 2);

    let lan = server.find_connection("192.168.1.5", 32400).unwrap();
    assert!(lan.is_local());
    assert_eq!(lan.class(), ConnectionClass::Manual);
    assert_eq!(lan.token().unwrap().expose_secret(), "secret");
    let wan = server.find_connection("203.0.113.9", 443).unwrap();
    assert_eq!(wan.scheme(), "https");
    assert!(!wan.has_token());

    assert_eq!(restored.best_server().unwrap().id().as_str(), "abc");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&RegistryEvent::ServerAvailable("abc".into())));
    assert!(seen.contains(&RegistryEvent::ServerAvailable("xyz".into())));
    assert!(seen.contains(&RegistryEvent::BestServerChanged("abc".into())));
}

#[test]
fn missing_state_file_loads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_at(&dir.path().join("absent.json"));
    assert_eq!(registry.load().unwrap(), 0);
    assert!(registry.is_empty());
}

#[test]
fn corrupt_state_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("servers.json");
    std::fs::write(&path, "{ not json").unwrap();

    let registry = registry_at(&path);
    assert!(matches!(registry.load(), Err(CoreError::State { .. })));
    assert!(registry.is_empty());
}

#[test]
fn builtin_servers_are_not_saved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("servers.json");
    let registry = registry_at(&path);
    registry.merge_server(den());
    registry.save().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let snapshot = RegistrySnapshot::from_json(&raw).unwrap();
    let ids: Vec<&str> = snapshot.servers.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["abc"]);
    assert!(snapshot.best_server.is_none());
}

#[test]
fn saved_best_that_no_longer_exists_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("servers.json");
    let registry = registry_at(&path);
    let den = registry.merge_server(den());
    registry.set_best_server(&den, false);

    let mut snapshot = registry.snapshot();
    snapshot.servers.clear();
    snapshot.write_to(&path).unwrap();

    let restored = registry_at(&path);
    assert_eq!(restored.load().unwrap(), 0);
    assert!(restored.best_server().is_none());
}
