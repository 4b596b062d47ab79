// ── Server discovery ──
//
// Two discovery sources feed the registry: GDM, the LAN multicast search
// that media servers answer with a header block, and manual entries that
// are identified by fetching their root document.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use plexlink_api::PlexHttp;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::config::ManualServer;
use crate::error::CoreError;
use crate::model::{Connection, ConnectionClass, Server, ServerDetails, is_local_address};
use crate::url::DEFAULT_SERVER_PORT;

pub const GDM_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 250);
pub const GDM_PORT: u16 = 32414;

const GDM_SEARCH: &[u8] = b"M-SEARCH * HTTP/1.1\r\n\r\n";
const GDM_CONTENT_TYPE: &str = "plex/media-server";
const RECV_BUFFER_SIZE: usize = 4096;

/// One server's answer to a GDM search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdmReply {
    pub identifier: String,
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
}

impl GdmReply {
    /// A server with one local, discovered connection at the reply's sender.
    pub fn into_server(self) -> Server {
        let details = ServerDetails {
            version: self.version,
            ..ServerDetails::named(self.name, true)
        };
        Server::new(self.identifier, details).with_connections([Connection::new(
            ConnectionClass::Discovered,
            "http",
            self.host,
            self.port,
            true,
            None,
        )])
    }
}

/// Parse a GDM reply datagram received from `from`.
///
/// Only `200 OK` replies advertising a media server count.
pub fn parse_gdm_reply(data: &str, from: IpAddr) -> Option<GdmReply> {
    let mut lines = data.lines();
    let status = lines.next()?.trim();
    if !status.starts_with("HTTP/") || !status.contains(" 200 ") {
        return None;
    }

    let mut content_type = None;
    let mut identifier = None;
    let mut name = None;
    let mut version = None;
    let mut port = None;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "content-type" => content_type = Some(value),
            "resource-identifier" => identifier = Some(value),
            "name" => name = Some(value),
            "version" => version = Some(value),
            "port" => port = value.parse::<u16>().ok(),
            _ => {}
        }
    }

    if !content_type.is_some_and(|ct| ct.eq_ignore_ascii_case(GDM_CONTENT_TYPE)) {
        return None;
    }
    let identifier = identifier.filter(|id| !id.is_empty())?;
    let host = from.to_string();

    Some(GdmReply {
        identifier: identifier.to_owned(),
        name: name.filter(|n| !n.is_empty()).unwrap_or(host.as_str()).to_owned(),
        version: version.unwrap_or_default().to_owned(),
        port: port.unwrap_or(DEFAULT_SERVER_PORT),
        host,
    })
}

/// Multicast a GDM search and collect replies until `timeout` elapses.
///
/// Replies from the same server (e.g. one per interface) are merged into
/// a single entry.
pub async fn discover_gdm(timeout: Duration) -> Result<Vec<Arc<Server>>, CoreError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| discovery_error("cannot bind GDM socket", &e))?;
    let target = SocketAddr::from((GDM_MULTICAST_ADDR, GDM_PORT));
    socket
        .send_to(GDM_SEARCH, target)
        .await
        .map_err(|e| discovery_error("cannot send GDM search", &e))?;
    debug!(%target, timeout_ms = timeout.as_millis(), "GDM search sent");

    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let mut servers: Vec<Arc<Server>> = Vec::new();

    loop {
        let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "GDM receive failed");
                break;
            }
            Ok(Ok(received)) => received,
        };
        let (len, from) = received;
        let data = String::from_utf8_lossy(&buf[..len]);
        let Some(reply) = parse_gdm_reply(&data, from.ip()) else {
            trace!(%from, "ignoring GDM datagram");
            continue;
        };

        debug!(%from, server = %reply.identifier, name = %reply.name, "GDM reply");
        let server = reply.into_server();
        match servers.iter().find(|s| s.id() == server.id()) {
            Some(existing) => existing.merge(&server),
            None => servers.push(Arc::new(server)),
        }
    }

    info!(servers = servers.len(), "GDM discovery finished");
    Ok(servers)
}

fn discovery_error(context: &str, err: &std::io::Error) -> CoreError {
    CoreError::Discovery {
        message: format!("{context}: {err}"),
    }
}

/// Identify a hand-entered address by fetching its root document.
///
/// The returned server carries one manual-class connection; locality is
/// inferred from the address.
pub async fn identify_server(
    http: &PlexHttp,
    manual: &ManualServer,
) -> Result<Arc<Server>, CoreError> {
    let connection = Connection::new(
        ConnectionClass::Manual,
        manual.scheme.clone(),
        manual.host.clone(),
        manual.port,
        is_local_address(&manual.host),
        manual.token.clone(),
    );
    let root = http
        .fetch_document(connection.build_url("/", None)?, None)
        .await?;

    let Some(identifier) = root.attr("machineIdentifier").filter(|id| !id.is_empty()) else {
        return Err(CoreError::Discovery {
            message: format!("{connection} did not report a machine identifier"),
        });
    };
    let name = root
        .attr("friendlyName")
        .filter(|n| !n.is_empty())
        .unwrap_or(manual.host.as_str());

    let server = Server::new(identifier, ServerDetails::named(name, true))
        .with_connections([connection]);
    server.collect_data_from_root(&root);
    info!(server = %server, host = %manual.host, port = manual.port, "identified manual server");
    Ok(Arc::new(server))
}
