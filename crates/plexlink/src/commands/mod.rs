pub mod browse;
pub mod config_cmd;
pub mod servers;

use std::time::Duration;

use tracing::{debug, warn};

use plexlink_config::Config;
use plexlink_core::PlexClient;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a server-facing command to its handler.
pub async fn dispatch(
    cmd: Command,
    client: &PlexClient,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Servers(args) => servers::handle(client, args, cfg, global).await,
        Command::Browse(args) => browse::handle(client, args, cfg, global).await,
        Command::Discover(args) => {
            let timeout = args
                .timeout_ms
                .unwrap_or(cfg.defaults.discovery_timeout_ms);
            let found = client.discover(Duration::from_millis(timeout)).await?;
            debug!(found, "discovery finished");
            client.update_reachability(false).await;
            servers::list(client, plexlink_core::ServerFilter::All, global)
        }
        Command::Config(args) => config_cmd::handle(args, global),
    }
}

/// Search the local network (unless disabled) and race connections.
pub async fn refresh(client: &PlexClient, cfg: &Config, global: &GlobalOpts, force: bool) {
    if cfg.defaults.discovery && !global.no_discovery {
        let timeout = Duration::from_millis(cfg.defaults.discovery_timeout_ms);
        if let Err(e) = client.discover(timeout).await {
            warn!(error = %e, "local network search failed");
        }
    }
    client.update_reachability(force).await;
}
