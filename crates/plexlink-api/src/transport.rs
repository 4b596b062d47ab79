// Shared transport configuration for building reqwest::Client instances.
//
// Every request to a media server carries the same client identity
// headers, TLS policy and timeout, so the builder logic lives here once.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::error::Error;

/// TLS verification mode (api-level mirror of core's `TlsVerification`).
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed servers).
    DangerAcceptInvalid,
}

/// Who we are, as announced to the server on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub product: String,
    pub version: String,
    pub client_identifier: String,
    pub device_name: String,
    pub platform: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            product: "plexlink".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            client_identifier: "plexlink".into(),
            device_name: "plexlink".into(),
            platform: std::env::consts::OS.into(),
        }
    }
}

impl ClientIdentity {
    /// The `X-Plex-*` header set for this identity.
    pub fn headers(&self) -> HeaderMap {
        let pairs = [
            ("x-plex-product", self.product.as_str()),
            ("x-plex-version", self.version.as_str()),
            ("x-plex-client-identifier", self.client_identifier.as_str()),
            ("x-plex-device-name", self.device_name.as_str()),
            ("x-plex-platform", self.platform.as_str()),
            ("x-plex-provides", "player"),
        ];

        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(HeaderName::from_static(name), v);
                }
                Err(_) => warn!(header = name, "skipping identity header with invalid value"),
            }
        }
        headers
    }
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub identity: ClientIdentity,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            identity: ClientIdentity::default(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let user_agent = format!("{}/{}", self.identity.product, self.identity.version);
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(user_agent)
            .default_headers(self.identity.headers());

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_headers_cover_every_field() {
        let identity = ClientIdentity {
            product: "Plex for Tests".into(),
            version: "1.2.3".into(),
            client_identifier: "abc".into(),
            device_name: "bench".into(),
            platform: "linux".into(),
        };
        let headers = identity.headers();

        assert_eq!(headers.len(), 6);
        assert_eq!(headers["x-plex-product"], "Plex for Tests");
        assert_eq!(headers["x-plex-client-identifier"], "abc");
        assert_eq!(headers["x-plex-provides"], "player");
    }

    #[test]
    fn invalid_header_values_are_skipped() {
        let identity = ClientIdentity {
            device_name: "bad\nname".into(),
            ..ClientIdentity::default()
        };
        let headers = identity.headers();
        assert!(!headers.contains_key("x-plex-device-name"));
        assert!(headers.contains_key("x-plex-product"));
    }
}
