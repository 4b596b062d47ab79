use thiserror::Error;

/// Top-level error type for the `plexlink-api` crate.
///
/// Covers every failure mode of a single request: transport, HTTP status,
/// and document parsing. `plexlink-core` maps these into user-facing
/// diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── HTTP ────────────────────────────────────────────────────────
    /// The server answered with a non-success status code.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The response body is not well-formed XML, with the raw body for debugging.
    #[error("XML parse error: {message}")]
    Xml { message: String, body: String },

    /// The document parsed, but its root is not a media container.
    #[error("Unexpected document root <{element}>")]
    UnexpectedRoot { element: String },
}

impl Error {
    /// Returns `true` if the server reported an internal failure (status >= 500).
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::Transport(e) => e.status().is_some_and(|s| s.is_server_error()),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::HttpStatus { status, .. } => *status == 503,
            _ => false,
        }
    }

    /// Returns `true` if the document could not be understood.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Xml { .. } | Self::UnexpectedRoot { .. })
    }
}
