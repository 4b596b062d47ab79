//! `plexlink config` handlers. None of these touch the network.

use plexlink_config::{Config, ServerEntry};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = crate::config_file(global);

    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = crate::load_config(global)?;
            let out = match global.output {
                OutputFormat::Json => serde_json::to_string_pretty(&cfg)?,
                OutputFormat::JsonCompact => serde_json::to_string(&cfg)?,
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Config {
                        message: e.to_string(),
                        path: path.display().to_string(),
                    })?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init => {
            let mut cfg = crate::load_config(global)?;
            let generated = cfg.ensure_client_identifier();
            save(&cfg, global)?;
            let id = cfg.client_identifier.unwrap_or_default();
            let message = if generated {
                format!("Wrote {} (client identifier {id})", path.display())
            } else {
                format!("{} already initialised (client identifier {id})", path.display())
            };
            output::print_output(&message, global.quiet);
            Ok(())
        }

        ConfigCommand::AddServer {
            name,
            host,
            port,
            https,
            token,
        } => {
            let mut cfg = crate::load_config(global)?;
            cfg.ensure_client_identifier();

            let mut entry = ServerEntry::new(host, port);
            if https {
                entry.scheme = "https".into();
            }
            // Validate before anything is written.
            plexlink_config::to_manual_server(&name, &entry)?;

            if let Some(token) = token {
                plexlink_config::store_token(&name, &token)?;
            }
            cfg.servers.insert(name.clone(), entry);
            save(&cfg, global)?;
            output::print_output(&format!("Added server '{name}'"), global.quiet);
            Ok(())
        }

        ConfigCommand::RemoveServer { name } => {
            let mut cfg = crate::load_config(global)?;
            cfg.server(&name)?;
            cfg.servers.remove(&name);
            save(&cfg, global)?;
            output::print_output(&format!("Removed server '{name}'"), global.quiet);
            Ok(())
        }
    }
}

fn save(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    Ok(plexlink_config::save_config_to(
        cfg,
        &crate::config_file(global),
    )?)
}
