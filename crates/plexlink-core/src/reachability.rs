// ── Reachability race ──
//
// Every connection of a server is probed concurrently; the first success
// becomes "best", a local success displaces a remote best, and when all
// probes have reported (or the ceiling expires) best is committed as the
// server's active connection. Probes that report after the race has
// completed, or for an earlier cycle, are ignored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use plexlink_api::PlexHttp;
use tracing::{debug, info};

use crate::lock::lock;
use crate::model::{Connection, Server};

/// A bounded-time reachability check of one connection.
///
/// Implementations report exactly one outcome and never retry.
pub trait ConnectionProbe: Send + Sync {
    fn probe(&self, server: Arc<Server>, connection: Arc<Connection>) -> BoxFuture<'static, bool>;
}

/// Probe that fetches the server root over HTTP and checks its identity.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: PlexHttp,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(http: PlexHttp, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

impl ConnectionProbe for HttpProbe {
    fn probe(&self, server: Arc<Server>, connection: Arc<Connection>) -> BoxFuture<'static, bool> {
        let http = self.http.clone();
        let timeout = self.timeout;

        async move {
            let started = Instant::now();
            let url = match server.url_for(&connection, "/", None) {
                Ok(url) => url,
                Err(e) => {
                    debug!(server = %server.id(), connection = %connection, error = %e, "cannot build probe URL");
                    return false;
                }
            };

            let outcome = tokio::time::timeout(timeout, http.fetch_document(url, None)).await;
            let reachable = match outcome {
                Ok(Ok(root)) => server.collect_data_from_root(&root),
                Ok(Err(e)) => {
                    debug!(server = %server.id(), connection = %connection, error = %e, "probe failed");
                    false
                }
                Err(_) => {
                    debug!(server = %server.id(), connection = %connection, "probe timed out");
                    false
                }
            };

            info!(
                server = %server.id(),
                connection = %connection,
                elapsed_ms = started.elapsed().as_millis(),
                reachable,
                "connection test finished"
            );
            reachable
        }
        .boxed()
    }
}

impl Server {
    /// Race all connections and commit the winner as the active one.
    ///
    /// Returns `true` if a connection was found reachable within `ceiling`.
    /// Overlapping calls on the same server run one after the other.
    pub async fn update_reachability(
        self: &Arc<Self>,
        probe: &Arc<dyn ConnectionProbe>,
        ceiling: Duration,
    ) -> bool {
        let _gate = self.race_gate.lock().await;

        let mut connections = self.connections();
        connections.sort_by(|a, b| {
            b.is_local()
                .cmp(&a.is_local())
                .then_with(|| a.host().cmp(b.host()))
                .then_with(|| a.port().cmp(&b.port()))
        });

        let cycle = {
            let mut race = lock(&self.race);
            race.cycle += 1;
            race.best = None;
            race.outstanding = connections.len();
            race.complete = false;
            race.cycle
        };

        info!(
            server = %self.id(),
            connections = connections.len(),
            "updating reachability"
        );
        let started = Instant::now();

        for connection in connections {
            let server = Arc::clone(self);
            let test = probe.probe(Arc::clone(self), Arc::clone(&connection));
            tokio::spawn(async move {
                let success = test.await;
                server.on_connection_test(cycle, &connection, success);
            });
        }

        self.wait_for_probes(ceiling).await;

        let active = {
            let mut race = lock(&self.race);
            race.complete = true;
            race.active = race.best.clone();
            race.active.clone()
        };

        let elapsed_ms = started.elapsed().as_millis();
        match &active {
            Some(conn) => info!(
                server = %self.id(),
                connection = %conn,
                elapsed_ms,
                "reachability race finished"
            ),
            None => info!(
                server = %self.id(),
                elapsed_ms,
                "reachability race finished: FAILED"
            ),
        }
        active.is_some()
    }

    /// Block until every probe of the current cycle has reported, or until
    /// `ceiling` passes. Spurious wake-ups re-check the counter.
    async fn wait_for_probes(&self, ceiling: Duration) {
        let deadline = tokio::time::Instant::now() + ceiling;
        loop {
            let mut notified = std::pin::pin!(self.race_done.notified());
            notified.as_mut().enable();

            if lock(&self.race).outstanding == 0 {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(server = %self.id(), "reachability ceiling hit");
                return;
            }
        }
    }

    /// Probe completion callback.
    pub(crate) fn on_connection_test(&self, cycle: u64, connection: &Arc<Connection>, success: bool) {
        let mut race = lock(&self.race);
        if race.cycle != cycle || race.complete {
            debug!(
                server = %self.id(),
                connection = %connection,
                success,
                "ignoring late connection test"
            );
            return;
        }

        if success {
            let beats_remote = connection.is_local()
                && race.best.as_ref().is_some_and(|best| !best.is_local());
            if race.best.is_none() {
                race.best = Some(Arc::clone(connection));
            } else if beats_remote {
                race.best = Some(Arc::clone(connection));
                race.active = Some(Arc::clone(connection));
            }
        }

        race.outstanding = race.outstanding.saturating_sub(1);
        if race.outstanding == 0 {
            self.race_done.notify_one();
        }
    }
}
