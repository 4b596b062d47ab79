//! Clap derive structures for the `plexlink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// plexlink -- find media servers and browse their libraries
#[derive(Debug, Parser)]
#[command(
    name = "plexlink",
    version,
    about = "Find Plex media servers and browse their libraries",
    long_about = "Discovers media servers on the local network and from configured\n\
        addresses, races every known address of each server to find one that\n\
        answers, and browses library directories through the winner.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "PLEXLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "PLEXLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "PLEXLINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "PLEXLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Skip the local network search
    #[arg(long, global = true)]
    pub no_discovery: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List, race and pick media servers
    #[command(alias = "srv", alias = "s")]
    Servers(ServersArgs),

    /// Browse a directory by `plexserver://` URL
    #[command(alias = "ls", alias = "b")]
    Browse(BrowseArgs),

    /// Search the local network for media servers
    Discover(DiscoverArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),
}

// ── Servers ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServersArgs {
    #[command(subcommand)]
    pub command: ServersCommand,
}

#[derive(Debug, Subcommand)]
pub enum ServersCommand {
    /// List known servers and their active connection
    #[command(alias = "ls")]
    List {
        /// Only servers owned by this account
        #[arg(long, conflicts_with = "shared")]
        owned: bool,

        /// Only servers shared with this account
        #[arg(long)]
        shared: bool,
    },

    /// Race every server's connections and report the winners
    Race {
        /// Re-test servers that already have an active connection
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Show the best server, or make the given server the best one
    Best {
        /// Server machine identifier
        id: Option<String>,
    },

    /// Show a server's connections
    Connections {
        /// Server machine identifier
        id: String,
    },
}

// ── Browse ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct BrowseArgs {
    /// Directory URL, e.g. plexserver://<id>/library/sections
    pub url: String,

    /// Send this body with the request (turns the fetch into a POST)
    #[arg(long)]
    pub body: Option<String>,
}

// ── Discover ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// How long to wait for replies, in milliseconds
    #[arg(long, short = 't')]
    pub timeout_ms: Option<u64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with a fresh client identifier
    Init,

    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Add or replace a manual server address
    AddServer {
        /// Name for this server entry
        name: String,

        /// Host name or IP address
        host: String,

        /// Port the server listens on
        #[arg(long, default_value = "32400")]
        port: u16,

        /// Use https for this server
        #[arg(long)]
        https: bool,

        /// Store this access token in the system keyring
        #[arg(long)]
        token: Option<String>,
    },

    /// Remove a manual server address
    RemoveServer {
        /// Name of the server entry
        name: String,
    },
}
