//! `plexlink browse` handler.

use tabled::Tabled;

use plexlink_config::Config;
use plexlink_core::{Entry, Listing, PlexClient, PlexUrl};

use crate::cli::{BrowseArgs, GlobalOpts, OutputFormat};
use crate::commands::refresh;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Folder")]
    folder: String,
    #[tabled(rename = "Path")]
    path: String,
}

fn entry_row(entry: &Entry, color: bool) -> EntryRow {
    let title = entry.label().unwrap_or_default();
    EntryRow {
        title: if entry.is_folder {
            output::accent(title, color)
        } else {
            title.to_owned()
        },
        kind: entry.directory_type.to_string(),
        folder: output::flag(entry.is_folder, color),
        path: entry.path.clone().unwrap_or_default(),
    }
}

/// One-line summary shown above the entry table.
fn header(listing: &Listing) -> String {
    let title = listing.label().unwrap_or(&listing.path);
    match listing.content.as_deref() {
        Some(content) => format!("{title} [{content}] ({} entries)", listing.len()),
        None => format!("{title} ({} entries)", listing.len()),
    }
}

pub async fn handle(
    client: &PlexClient,
    args: BrowseArgs,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let url = PlexUrl::parse(&args.url)?;

    // Virtual hosts need servers raced before their data can load.
    refresh(client, cfg, global, false).await;

    let listing = match args.body {
        Some(body) => {
            client
                .fetcher()
                .directory()
                .with_body(body)
                .get_directory(&url)
                .await?
        }
        None => client.get_directory(&url).await?,
    };

    let out = match global.output {
        OutputFormat::Table => {
            let color = output::should_color(&global.color);
            let table = output::render_list(
                &global.output,
                &listing.entries,
                |e| entry_row(e, color),
                |e| e.path.clone().unwrap_or_default(),
            )?;
            format!("{}\n{table}", header(&listing))
        }
        _ => output::render_single(
            &global.output,
            &listing,
            header,
            |l| {
                l.entries
                    .iter()
                    .filter_map(|e| e.path.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            },
        )?,
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
