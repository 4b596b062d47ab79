// ── Document-to-listing conversion ──
//
// Turns a parsed `MediaContainer` tree into a typed `Listing`. Each XML
// attribute is routed through a small table (integers, booleans, keys,
// artwork, media flags, type, label, dates) and everything unknown is kept
// as text, so no server-supplied information is dropped.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use plexlink_api::XmlElement;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{
    ArtRole, Artwork, DirectoryType, Entry, Listing, MediaRecord, Properties, Value,
};
use crate::url::PlexUrl;

const ALL_LEAVES_SUFFIX: &str = "/allLeaves";

// ── Attribute table ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrKind {
    Int,
    Bool,
    Key,
    Art(ArtRole),
    MediaFlag,
    Type,
    Content,
    Date,
    Text,
}

fn attr_kind(name: &str) -> AttrKind {
    match name {
        "size" | "channels" | "createdAt" | "updatedAt" | "leafCount" | "viewedLeafCount"
        | "ratingKey" | "bitrate" | "duration" | "librarySectionID" | "streamType" | "index"
        | "samplingRate" | "dialogNorm" | "viewMode" | "autoRefresh" => AttrKind::Int,

        "filters" | "refreshing" | "allowSync" | "secondary" | "search" | "selected"
        | "indirect" | "popup" | "installed" | "settings" => AttrKind::Bool,

        "key" | "theme" | "parentKey" | "grandparentKey" => AttrKind::Key,

        "thumb" => AttrKind::Art(ArtRole::Thumb),
        "art" => AttrKind::Art(ArtRole::Fanart),
        "poster" => AttrKind::Art(ArtRole::Poster),
        "banner" => AttrKind::Art(ArtRole::Banner),
        "parentThumb" => AttrKind::Art(ArtRole::ParentThumb),
        "grandparentThumb" => AttrKind::Art(ArtRole::GrandparentThumb),

        "aspectRatio" | "audioChannels" | "audioCodec" | "videoCodec" | "videoResolution"
        | "videoFrameRate" | "contentRating" | "grandparentContentRating" | "studio"
        | "grandparentStudio" => AttrKind::MediaFlag,

        "type" => AttrKind::Type,
        "content" => AttrKind::Content,
        "originallyAvailableAt" => AttrKind::Date,
        _ => AttrKind::Text,
    }
}

/// The parts of an entry or listing that attributes write into.
trait AttributeTarget {
    fn directory_type(&mut self) -> &mut DirectoryType;
    fn properties(&mut self) -> &mut Properties;
    fn art(&mut self) -> &mut Artwork;
    fn media_flags(&mut self) -> &mut BTreeMap<String, String>;
}

impl AttributeTarget for Entry {
    fn directory_type(&mut self) -> &mut DirectoryType {
        &mut self.directory_type
    }
    fn properties(&mut self) -> &mut Properties {
        &mut self.properties
    }
    fn art(&mut self) -> &mut Artwork {
        &mut self.art
    }
    fn media_flags(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.media_flags
    }
}

impl AttributeTarget for Listing {
    fn directory_type(&mut self) -> &mut DirectoryType {
        &mut self.directory_type
    }
    fn properties(&mut self) -> &mut Properties {
        &mut self.properties
    }
    fn art(&mut self) -> &mut Artwork {
        &mut self.art
    }
    fn media_flags(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.media_flags
    }
}

fn apply_attribute(target: &mut impl AttributeTarget, base: &PlexUrl, name: &str, raw: &str) {
    match attr_kind(name) {
        AttrKind::Int => {
            let value = raw
                .trim()
                .parse::<i64>()
                .map_or_else(|_| Value::from(raw), Value::Int);
            target.properties().insert(name, value);
        }
        AttrKind::Bool => {
            let value = matches!(raw.trim(), "1" | "true");
            target.properties().insert(name, Value::Bool(value));
        }
        AttrKind::Key => {
            target.properties().insert(format!("unprocessed_{name}"), raw);
            target.properties().insert(name, base.resolve_key(raw));
        }
        AttrKind::Art(role) => {
            if !raw.is_empty() {
                target.art().set(role, base.resolve_key(raw));
            }
        }
        AttrKind::MediaFlag => {
            target.media_flags().insert(name.to_owned(), raw.to_owned());
        }
        AttrKind::Type => {
            *target.directory_type() = DirectoryType::parse(raw);
            target.properties().insert(name, raw);
        }
        AttrKind::Content => {
            if *target.directory_type() == DirectoryType::Unknown {
                *target.directory_type() = DirectoryType::parse(raw);
            }
            target.properties().insert(name, raw);
        }
        AttrKind::Date => {
            let value = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_or_else(|_| Value::from(raw), Value::Date);
            target.properties().insert(name, value);
        }
        AttrKind::Text => target.properties().insert(name, raw),
    }
}

fn apply_attributes(target: &mut impl AttributeTarget, base: &PlexUrl, element: &XmlElement) {
    for (name, raw) in &element.attributes {
        apply_attribute(target, base, name, raw);
    }
}

// ── Entries ────────────────────────────────────────────────────────

fn is_folder(entry: &Entry) -> bool {
    entry.element == "Directory" || !entry.directory_type.is_leaf()
}

fn read_entry(element: &XmlElement, container: &Listing, base: &PlexUrl) -> Entry {
    let mut entry = Entry {
        element: element.name.clone(),
        ..Entry::default()
    };
    apply_attributes(&mut entry, base, element);

    if entry.directory_type == DirectoryType::Unknown {
        entry.directory_type = DirectoryType::parse(&element.name);
    }

    entry.path = entry.properties.text("key").map(str::to_owned);
    entry
        .properties
        .insert("plexserver", base.host().to_owned());

    // Inherited from the container.
    let container_key = container
        .properties
        .text("unprocessed_key")
        .unwrap_or_default()
        .to_owned();
    entry.properties.insert("containerKey", container_key);
    if !entry.properties.contains("identifier") {
        if let Some(identifier) = container.properties.get("identifier") {
            entry.properties.insert("identifier", identifier.clone());
        }
    }
    for role in [ArtRole::Fanart, ArtRole::Thumb] {
        if !entry.art.has(role) {
            if let Some(url) = container.art.get(role) {
                entry.art.set(role, url);
            }
        }
    }

    entry.media = entry.directory_type.media_kind().map(|kind| MediaRecord {
        kind,
        genres: element
            .children_named("Genre")
            .filter_map(|g| g.attr("tag"))
            .map(str::to_owned)
            .collect(),
    });

    entry.is_folder = is_folder(&entry);
    entry
}

// ── Listing ────────────────────────────────────────────────────────

/// Convert a container document fetched from `url` into a listing.
pub fn read_media_container(root: &XmlElement, url: &PlexUrl) -> Result<Listing, CoreError> {
    if !root.is_container() {
        return Err(CoreError::Parse {
            message: format!("{url}: root element <{}> is not a media container", root.name),
        });
    }

    let mut listing = Listing {
        path: url.to_string(),
        ..Listing::default()
    };
    listing
        .properties
        .insert("plexserver", url.host().to_owned());
    apply_attributes(&mut listing, url, root);
    apply_attribute(&mut listing, url, "key", url.path());

    let entries: Vec<Entry> = root
        .children
        .iter()
        .map(|child| read_entry(child, &listing, url))
        .collect();
    listing.entries = entries;

    if listing.directory_type == DirectoryType::Unknown {
        listing.directory_type = infer_type(&listing.entries);
    }
    listing.content = listing.directory_type.content().map(str::to_owned);
    if listing.content.is_none() {
        debug!(directory_type = %listing.directory_type, "no content tag for listing type");
    }
    listing.media = listing.directory_type.media_kind().map(MediaRecord::new);

    Ok(listing)
}

/// Listing type from its entries: the first one, unless it is the
/// synthetic "all items" entry and a second one exists.
fn infer_type(entries: &[Entry]) -> DirectoryType {
    match entries {
        [first, second, ..]
            if first
                .properties
                .text("unprocessed_key")
                .is_some_and(|k| k.ends_with(ALL_LEAVES_SUFFIX)) =>
        {
            second.directory_type
        }
        [first, ..] => first.directory_type,
        [] => DirectoryType::Unknown,
    }
}
