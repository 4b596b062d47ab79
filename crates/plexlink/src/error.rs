//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use plexlink_config::ConfigError;
use plexlink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Servers ──────────────────────────────────────────────────────
    #[error("Server '{identifier}' not found")]
    #[diagnostic(
        code(plexlink::server_not_found),
        help("Run: plexlink servers list to see known servers")
    )]
    ServerNotFound { identifier: String },

    #[error("No best server has been chosen yet")]
    #[diagnostic(
        code(plexlink::no_best_server),
        help(
            "Run: plexlink servers race\n\
             Or add an address with: plexlink config add-server <name> <host>"
        )
    )]
    NoBestServer,

    #[error("Could not reach {url}: {reason}")]
    #[diagnostic(
        code(plexlink::connection_failed),
        help("Check that the server is running, or try: plexlink servers race --force")
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Server error ({status}) from {url}")]
    #[diagnostic(code(plexlink::server_error))]
    ServerError { status: u16, url: String },

    #[error("Could not read the server's response: {message}")]
    #[diagnostic(code(plexlink::parse))]
    Parse { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(plexlink::timeout),
        help("Increase timeout with --timeout or check server responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(plexlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(plexlink::config),
        help(
            "Create a config with: plexlink config init\n\
             Expected at: {path}"
        )
    )]
    Config { message: String, path: String },

    // ── Fallback ─────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(plexlink::core))]
    Core { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not serialize output: {0}")]
    #[diagnostic(code(plexlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ServerError { .. } => exit_code::CONNECTION,
            Self::ServerNotFound { .. } | Self::NoBestServer => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ServerNotFound { identifier } => Self::ServerNotFound { identifier },
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::NoConnection { identifier } => Self::ConnectionFailed {
                url: format!("plexserver://{identifier}"),
                reason: "server has no connections".into(),
            },
            CoreError::ServerError { status, url } => Self::ServerError { status, url },
            CoreError::Parse { message } => Self::Parse { message },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::InvalidUrl { message } => Self::Validation {
                field: "url".into(),
                reason: message,
            },
            CoreError::Config { message } => Self::Config {
                message,
                path: plexlink_config::config_path().display().to_string(),
            },
            other => Self::Core {
                message: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownServer { name } => Self::ServerNotFound { identifier: name },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                message: other.to_string(),
                path: plexlink_config::config_path().display().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_exit_codes() {
        let missing: CliError = CoreError::ServerNotFound {
            identifier: "abc".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);

        let down: CliError = CoreError::ServerError {
            status: 503,
            url: "http://10.0.0.1:32400/".into(),
        }
        .into();
        assert_eq!(down.exit_code(), exit_code::CONNECTION);

        let cancelled: CliError = CoreError::Cancelled.into();
        assert_eq!(cancelled.exit_code(), exit_code::GENERAL);
    }

    #[test]
    fn unknown_config_server_is_not_found() {
        let err: CliError = ConfigError::UnknownServer {
            name: "den".into(),
        }
        .into();
        assert!(matches!(err, CliError::ServerNotFound { ref identifier } if identifier == "den"));
    }
}
