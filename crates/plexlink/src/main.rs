mod cli;
mod commands;
mod error;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use plexlink_config::Config;
use plexlink_core::{PlexClient, TlsVerification};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands never talk to a server
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        cmd => {
            let cfg = load_config(&cli.global)?;
            let client = build_client(&cfg, &cli.global)?;
            client.start().await?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &client, &cfg, &cli.global).await;

            if let Err(e) = client.shutdown().await {
                warn!(error = %e, "could not save server state");
            }
            result
        }
    }
}

/// The config file in effect: `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(plexlink_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(plexlink_config::load_config_from(&config_file(global))?)
}

/// Build the client from the config file plus CLI flag overrides.
fn build_client(cfg: &Config, global: &GlobalOpts) -> Result<PlexClient, CliError> {
    let mut client_config = plexlink_config::to_client_config(cfg)?;

    if global.insecure {
        client_config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        client_config.request_timeout = Duration::from_secs(secs);
    }

    Ok(PlexClient::new(client_config)?)
}
