// Raw HTTP client for media server endpoints
//
// Wraps `reqwest::Client` with the GET-or-POST choice, status checking and
// document parsing. URL construction (connection choice, access tokens)
// happens in the core crate; this module only moves bytes.

use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::document::{XmlElement, parse_document};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Cheaply cloneable HTTP client shared by probes, fetches and jobs.
#[derive(Debug, Clone)]
pub struct PlexHttp {
    http: reqwest::Client,
}

impl PlexHttp {
    /// Create a client from a `TransportConfig`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Issue a GET, or a POST when `body` is set, and return status + body.
    ///
    /// Non-success statuses are returned as data, not as errors; only a
    /// request that could not complete is an `Err`.
    pub async fn fetch(&self, url: Url, body: Option<&str>) -> Result<RawResponse, Error> {
        let request = if let Some(body) = body {
            debug!(%url, "issuing POST request");
            self.http.post(url).body(body.to_owned())
        } else {
            debug!(%url, "issuing GET request");
            self.http.get(url)
        };

        let resp = request.send().await.map_err(Error::Transport)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(Error::Transport)?;

        Ok(RawResponse { status, body })
    }

    /// Fetch `url` and parse the body into a document tree.
    ///
    /// Fails with `HttpStatus` on a non-success status, and with `Xml` /
    /// `UnexpectedRoot` when the body is not a media container.
    pub async fn fetch_document(&self, url: Url, body: Option<&str>) -> Result<XmlElement, Error> {
        let url_text = url.to_string();
        let resp = self.fetch(url, body).await?;

        if !resp.is_success() {
            return Err(Error::HttpStatus {
                status: resp.status,
                url: url_text,
            });
        }

        parse_document(&resp.body)
    }
}
