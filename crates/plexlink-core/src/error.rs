// ── Core error types ──
//
// User-facing errors from plexlink-core. Consumers never see reqwest or
// quick-xml failures directly; the `From<plexlink_api::Error>` impl
// translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Registry errors ──────────────────────────────────────────────
    #[error("Server not found: {identifier}")]
    ServerNotFound { identifier: String },

    #[error("Server {identifier} has no connections")]
    NoConnection { identifier: String },

    // ── Request errors ───────────────────────────────────────────────
    #[error("Cannot reach {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Server error {status} from {url}")]
    ServerError { status: u16, url: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Could not parse server response: {message}")]
    Parse { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid URL: {message}")]
    InvalidUrl { message: String },

    // ── Persistence / discovery ──────────────────────────────────────
    #[error("State file error: {message}")]
    State { message: String },

    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Transport failure or server-side error (taxonomy a).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ServerError { .. } | Self::Timeout { .. }
        )
    }

    /// The server answered, but with a document we could not use.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<plexlink_api::Error> for CoreError {
    fn from(err: plexlink_api::Error) -> Self {
        match err {
            plexlink_api::Error::Transport(ref e) => {
                let url = e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string);
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if let Some(status) = e.status().filter(|s| s.is_server_error()) {
                    CoreError::ServerError {
                        status: status.as_u16(),
                        url,
                    }
                } else {
                    CoreError::ConnectionFailed {
                        url,
                        reason: e.to_string(),
                    }
                }
            }
            plexlink_api::Error::InvalidUrl(e) => CoreError::InvalidUrl {
                message: e.to_string(),
            },
            plexlink_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            plexlink_api::Error::HttpStatus { status, url } if status >= 500 => {
                CoreError::ServerError { status, url }
            }
            plexlink_api::Error::HttpStatus { status, url } => CoreError::HttpStatus { status, url },
            plexlink_api::Error::Xml { message, body: _ } => CoreError::Parse { message },
            plexlink_api::Error::UnexpectedRoot { element } => CoreError::Parse {
                message: format!("unexpected root element <{element}>"),
            },
        }
    }
}
