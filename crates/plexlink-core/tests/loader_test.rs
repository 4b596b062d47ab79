#![allow(clippy::unwrap_used)]
// Server data loader and client facade tests against a wiremock server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plexlink_api::{PlexHttp, TransportConfig};
use plexlink_core::{
    ClientConfig, Connection, ConnectionClass, ConnectionProbe, CoreError, LoaderEvent,
    PlexClient, PlexUrl, Server, ServerDetails, ServerId,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct NeverProbe;

impl ConnectionProbe for NeverProbe {
    fn probe(&self, _: Arc<Server>, _: Arc<Connection>) -> BoxFuture<'static, bool> {
        async { false }.boxed()
    }
}

const SECTIONS: &str = r#"<MediaContainer size="2" title1="Plex Library">
  <Directory key="1" type="movie" title="Movies" art="/:/resources/movie-fanart.jpg"/>
  <Directory key="2" type="show" title="TV Shows"/>
</MediaContainer>"#;

const CHANNELS: &str = r#"<MediaContainer size="2">
  <Directory key="/video/trailers" title="Trailers"/>
  <Directory key="/music/radio" title="Radio"/>
</MediaContainer>"#;

async fn mock_server() -> MockServer {
    let mock = MockServer::start().await;
    for (at, body) in [("/library/sections", SECTIONS), ("/channels/all", CHANNELS)] {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock)
            .await;
    }
    mock
}

fn client() -> PlexClient {
    let config = ClientConfig {
        augmentation_ceiling: Duration::from_secs(2),
        ..ClientConfig::default()
    };
    let http = PlexHttp::new(&TransportConfig::default()).unwrap();
    PlexClient::with_probe(config, http, Arc::new(NeverProbe))
}

fn server_at(mock: &MockServer, id: &str, name: &str, owned: bool) -> Arc<Server> {
    let addr = mock.address();
    let mut details = ServerDetails::named(name, owned);
    details.owner = "jamie".into();
    Arc::new(Server::new(id, details).with_connections([Connection::new(
        ConnectionClass::Manual,
        "http",
        addr.ip().to_string(),
        addr.port(),
        true,
        None,
    )]))
}

async fn next_loader_event(
    rx: &mut tokio::sync::broadcast::Receiver<LoaderEvent>,
) -> LoaderEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

// ── Loader ──────────────────────────────────────────────────────────

#[tokio::test]
async fn owned_server_loads_sections_and_channels() {
    let mock = mock_server().await;
    let client = client();
    let den = client
        .registry()
        .merge_server(server_at(&mock, "abc", "Den", true));

    client.loader().load(&den).await.unwrap();

    let data = client.loader().server_data(den.id()).unwrap();
    assert_eq!(data.sections.len(), 2);
    assert_eq!(data.channels.as_ref().unwrap().len(), 2);

    let owned = client.loader().all_owned_sections();
    assert_eq!(owned.len(), 2);
    assert_eq!(owned[0].properties.text("serverName"), Some("Den"));
    assert_eq!(owned[0].properties.text("serverUUID"), Some("abc"));
    assert!(client.loader().all_shared_sections().is_empty());
}

#[tokio::test]
async fn shared_server_skips_channels() {
    let mock = mock_server().await;
    let client = client();
    let friend = client
        .registry()
        .merge_server(server_at(&mock, "xyz", "Friend", false));

    client.loader().load(&friend).await.unwrap();

    assert!(client.loader().server_data(friend.id()).unwrap().channels.is_none());
    assert_eq!(client.loader().all_shared_sections().len(), 2);
    assert!(client.loader().all_channels().is_empty());
}

#[tokio::test]
async fn follows_registry_availability() {
    let mock = mock_server().await;
    let client = client();
    let loader = client.loader().clone();
    let mut events = loader.subscribe();
    let cancel = CancellationToken::new();
    let task = loader.spawn(cancel.clone());

    let den = client
        .registry()
        .merge_server(server_at(&mock, "abc", "Den", true));

    client.registry().server_reachability_done(&den, true);
    assert_eq!(
        next_loader_event(&mut events).await,
        LoaderEvent::DataLoaded(ServerId::from("abc"))
    );
    assert!(loader.is_loaded(den.id()));

    client.registry().server_reachability_done(&den, false);
    assert_eq!(
        next_loader_event(&mut events).await,
        LoaderEvent::DataUnloaded(ServerId::from("abc"))
    );
    assert!(loader.sections(den.id()).is_none());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn unavailable_during_load_discards_result() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(SECTIONS)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/channels/all"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHANNELS))
        .mount(&mock)
        .await;

    let client = client();
    let loader = client.loader().clone();
    let mut events = loader.subscribe();
    let cancel = CancellationToken::new();
    let task = loader.spawn(cancel.clone());

    let den = client
        .registry()
        .merge_server(server_at(&mock, "abc", "Den", true));

    client.registry().server_reachability_done(&den, true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.registry().server_reachability_done(&den, false);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!loader.is_loaded(den.id()));
    let seen: Vec<LoaderEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(!seen.contains(&LoaderEvent::DataLoaded(ServerId::from("abc"))));

    // A later availability loads normally again.
    client.registry().server_reachability_done(&den, true);
    assert_eq!(
        next_loader_event(&mut events).await,
        LoaderEvent::DataLoaded(ServerId::from("abc"))
    );

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn unloading_unknown_server_is_quiet() {
    let client = client();
    let mut events = client.loader().subscribe();
    assert!(!client.loader().unload(&ServerId::from("nobody")));
    assert!(events.try_recv().is_err());
}

// ── Virtual hosts ───────────────────────────────────────────────────

#[tokio::test]
async fn shared_host_lists_shared_sections() {
    let mock = mock_server().await;
    let client = client();
    let friend = client
        .registry()
        .merge_server(server_at(&mock, "xyz", "Friend", false));
    client.loader().load(&friend).await.unwrap();

    let listing = client
        .get_directory(&PlexUrl::parse("plexserver://shared").unwrap())
        .await
        .unwrap();

    assert_eq!(listing.path, "plexserver://shared");
    assert_eq!(listing.len(), 2);
    let movies = &listing.entries[0];
    assert!(movies.is_folder);
    assert_eq!(movies.label(), Some("Movies"));
    assert_eq!(movies.properties.text("sourceTitle"), Some("jamie"));
    assert_eq!(movies.properties.text("serverName"), Some("Friend"));
    assert_eq!(movies.properties.text("machineIdentifier"), Some("xyz"));
    assert_eq!(
        movies.path.as_deref(),
        Some("plexserver://xyz/library/sections/1")
    );
}

#[tokio::test]
async fn channels_host_tags_channel_types() {
    let mock = mock_server().await;
    let client = client();
    let den = client
        .registry()
        .merge_server(server_at(&mock, "abc", "Den", true));
    client.loader().load(&den).await.unwrap();

    let listing = client
        .get_directory(&PlexUrl::parse("plexserver://channels").unwrap())
        .await
        .unwrap();

    let types: Vec<Option<&str>> = listing
        .entries
        .iter()
        .map(|e| e.properties.text("channelType"))
        .collect();
    assert_eq!(types, vec![Some("video"), Some("music")]);
    assert_eq!(listing.entries[0].properties.text("serverName"), Some("Den"));
}

#[tokio::test]
async fn channel_directory_needs_best_server() {
    let client = client();
    let result = client
        .get_directory(&PlexUrl::parse("plexserver://channeldirectory").unwrap())
        .await;
    assert!(matches!(result, Err(CoreError::ServerNotFound { .. })));
}

#[tokio::test]
async fn channel_directory_forwards_to_best_server() {
    let mock = mock_server().await;
    Mock::given(method("GET"))
        .and(path("/system/appstore"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<MediaContainer size="1"><Directory key="featured" title="Featured"/></MediaContainer>"#,
        ))
        .expect(1)
        .mount(&mock)
        .await;
    let client = client();
    let den = client
        .registry()
        .merge_server(server_at(&mock, "abc", "Den", true));
    client.registry().set_best_server(&den, false);

    let listing = client
        .get_directory(&PlexUrl::parse("plexserver://channeldirectory").unwrap())
        .await
        .unwrap();

    assert_eq!(listing.path, "plexserver://channeldirectory");
    assert_eq!(listing.entries[0].label(), Some("Featured"));
}
