//! `plexlink servers` handlers.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use plexlink_config::Config;
use plexlink_core::{Connection, PlexClient, Server, ServerFilter};

use crate::cli::{GlobalOpts, ServersArgs, ServersCommand};
use crate::commands::refresh;
use crate::error::CliError;
use crate::output;

// ── Views ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ServerView {
    id: String,
    name: String,
    owned: bool,
    owner: String,
    version: String,
    reachable: bool,
    local: bool,
    address: Option<String>,
    best: bool,
}

impl ServerView {
    fn new(server: &Server, best: Option<&Arc<Server>>) -> Self {
        let details = server.details();
        let active = server.active_connection();
        Self {
            id: server.id().to_string(),
            name: details.name.clone(),
            owned: details.owned,
            owner: details.owner.clone(),
            version: details.version.clone(),
            reachable: active.is_some(),
            local: active.as_ref().is_some_and(|c| c.is_local()),
            address: active.as_deref().map(address),
            best: best.is_some_and(|b| b.id() == server.id()),
        }
    }
}

#[derive(Tabled)]
struct ServerRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Owned")]
    owned: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Local")]
    local: String,
}

fn server_row(view: &ServerView, color: bool) -> ServerRow {
    let name = if view.best {
        output::accent(&format!("{} *", view.name), color)
    } else {
        view.name.clone()
    };
    ServerRow {
        id: view.id.clone(),
        name,
        owned: output::flag(view.owned, color),
        version: view.version.clone(),
        address: view.address.clone().unwrap_or_else(|| "unreachable".into()),
        local: output::flag(view.local, color),
    }
}

fn server_detail(view: &ServerView) -> String {
    output::detail_lines(&[
        ("ID", view.id.clone()),
        ("Name", view.name.clone()),
        ("Owner", view.owner.clone()),
        ("Owned", view.owned.to_string()),
        ("Version", view.version.clone()),
        (
            "Address",
            view.address.clone().unwrap_or_else(|| "unreachable".into()),
        ),
        ("Local", view.local.to_string()),
    ])
}

#[derive(Debug, Serialize)]
struct ConnectionView {
    address: String,
    class: String,
    local: bool,
    token: bool,
    active: bool,
    best: bool,
}

#[derive(Tabled)]
struct ConnectionRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Source")]
    class: String,
    #[tabled(rename = "Local")]
    local: String,
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Active")]
    active: String,
}

fn address(connection: &Connection) -> String {
    format!(
        "{}://{}:{}",
        connection.scheme(),
        connection.host(),
        connection.port()
    )
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &PlexClient,
    args: ServersArgs,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ServersCommand::List { owned, shared } => {
            refresh(client, cfg, global, false).await;
            let filter = if owned {
                ServerFilter::Owned
            } else if shared {
                ServerFilter::Shared
            } else {
                ServerFilter::All
            };
            list(client, filter, global)
        }

        ServersCommand::Race { force } => {
            refresh(client, cfg, global, force).await;
            list(client, ServerFilter::All, global)
        }

        ServersCommand::Best { id } => {
            let registry = client.registry();
            if let Some(id) = id {
                if registry.find_by_id(&id).is_none() {
                    refresh(client, cfg, global, false).await;
                }
                registry.set_best_server_by_id(&id, true)?;
            } else if registry.best_server().is_none() {
                refresh(client, cfg, global, false).await;
            }

            let best = registry.best_server().ok_or(CliError::NoBestServer)?;
            let view = ServerView::new(&best, Some(&best));
            let out = output::render_single(&global.output, &view, server_detail, |v| {
                v.id.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ServersCommand::Connections { id } => {
            let registry = client.registry();
            if registry.find_by_id(&id).is_none() {
                refresh(client, cfg, global, false).await;
            }
            let server = registry
                .find_by_id(&id)
                .ok_or_else(|| CliError::ServerNotFound { identifier: id })?;
            connections(&server, global)
        }
    }
}

/// Print the registry's servers, best server first.
pub fn list(
    client: &PlexClient,
    filter: ServerFilter,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let best = client.registry().best_server();
    let mut views: Vec<ServerView> = client
        .registry()
        .servers(filter)
        .iter()
        .map(|s| ServerView::new(s, best.as_ref()))
        .collect();
    views.sort_by(|a, b| b.best.cmp(&a.best).then_with(|| a.name.cmp(&b.name)));

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &views,
        |v| server_row(v, color),
        |v| v.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn connections(server: &Server, global: &GlobalOpts) -> Result<(), CliError> {
    let active = server.active_connection();
    let best = server.best_connection();
    let views: Vec<ConnectionView> = server
        .connections()
        .iter()
        .map(|c| ConnectionView {
            address: address(c),
            class: c.class().to_string(),
            local: c.is_local(),
            token: c.has_token(),
            active: active.as_ref().is_some_and(|a| Arc::ptr_eq(a, c)),
            best: best.as_ref().is_some_and(|b| Arc::ptr_eq(b, c)),
        })
        .collect();

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &views,
        |v| ConnectionRow {
            address: v.address.clone(),
            class: v.class.clone(),
            local: output::flag(v.local, color),
            token: output::flag(v.token, color),
            active: output::flag(v.active, color),
        },
        |v| v.address.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
