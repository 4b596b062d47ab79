// ── Directory listings ──
//
// The typed result of a directory fetch: container-level metadata plus an
// ordered sequence of entries. Entries keep server order; nothing here
// re-sorts them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Directory / item type tag.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryType {
    #[default]
    Unknown,
    Movie,
    Show,
    Season,
    Episode,
    Artist,
    Album,
    Track,
    Photo,
    Video,
    Directory,
    Section,
    Server,
    Device,
    SyncItem,
    MediaSettings,
    Policy,
    Location,
    Media,
    Part,
    SyncItems,
    Stream,
    Status,
    TranscodeJob,
    TranscodeSession,
    Provider,
    Clip,
    Playlist,
    Channel,
    Secondary,
    Genre,
    Role,
    Writer,
    Producer,
    Country,
    Director,
    Thumb,
    Image,
}

impl DirectoryType {
    /// Parse a type name; anything unrecognised is `Unknown`.
    pub fn parse(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Content tag for a listing of this type, if it has one.
    pub fn content(self) -> Option<&'static str> {
        match self {
            Self::Movie => Some("movies"),
            Self::Show => Some("tvshows"),
            Self::Season => Some("seasons"),
            Self::Episode => Some("episodes"),
            Self::Artist => Some("artists"),
            Self::Album => Some("albums"),
            Self::Track => Some("songs"),
            Self::Secondary => Some("secondary"),
            _ => None,
        }
    }

    /// Types that are never folders unless they come as `<Directory>`.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            Self::Video
                | Self::Episode
                | Self::Movie
                | Self::Photo
                | Self::Part
                | Self::Stream
                | Self::Genre
                | Self::Role
                | Self::Country
                | Self::Writer
                | Self::Director
                | Self::Media
                | Self::Clip
                | Self::Track
        )
    }

    /// Kind of structured media record carried by items of this type.
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            Self::Movie | Self::Show | Self::Season | Self::Episode | Self::Clip | Self::Video => {
                Some(MediaKind::Video)
            }
            Self::Artist | Self::Album | Self::Track => Some(MediaKind::Music),
            _ => None,
        }
    }
}

// ── Artwork ──────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtRole {
    Thumb,
    Fanart,
    Poster,
    Banner,
    ParentThumb,
    GrandparentThumb,
}

/// Image references keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artwork(BTreeMap<ArtRole, String>);

impl Artwork {
    pub fn get(&self, role: ArtRole) -> Option<&str> {
        self.0.get(&role).map(String::as_str)
    }

    pub fn has(&self, role: ArtRole) -> bool {
        self.0.contains_key(&role)
    }

    pub fn set(&mut self, role: ArtRole, url: impl Into<String>) {
        self.0.insert(role, url.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtRole, &str)> {
        self.0.iter().map(|(role, url)| (*role, url.as_str()))
    }

    /// Add every role from `other` that is not already present.
    pub fn union_with(&mut self, other: &Artwork) {
        for (role, url) in &other.0 {
            self.0.entry(*role).or_insert_with(|| url.clone());
        }
    }
}

// ── Property values ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Self::Date(d) => write!(f, "{d}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Named attributes of an entry or listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Text value of `name` (non-text values are not converted).
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every property of `other` whose name is absent here.
    /// Existing values are never overwritten. Returns how many were copied.
    pub fn fill_absent_from(&mut self, other: &Properties) -> usize {
        let mut copied = 0;
        for (name, value) in &other.0 {
            if !self.0.contains_key(name) {
                self.0.insert(name.clone(), value.clone());
                copied += 1;
            }
        }
        copied
    }
}

// ── Structured media record ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Music,
}

/// Typed media metadata; only array-valued fields are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub kind: MediaKind,
    pub genres: Vec<String>,
}

impl MediaRecord {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            genres: Vec::new(),
        }
    }
}

// ── Entries and listings ─────────────────────────────────────────────

/// One item of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// XML element the entry came from (`Directory`, `Video`, ...).
    pub element: String,
    pub directory_type: DirectoryType,
    pub is_folder: bool,
    /// Resolved `key`, i.e. where the entry leads.
    pub path: Option<String>,
    pub properties: Properties,
    pub art: Artwork,
    pub media_flags: BTreeMap<String, String>,
    pub media: Option<MediaRecord>,
}

impl Entry {
    /// Display label: `title`, falling back to `name`.
    pub fn label(&self) -> Option<&str> {
        self.properties
            .text("title")
            .or_else(|| self.properties.text("name"))
    }
}

/// Parsed result of a directory fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// URL the listing was fetched from.
    pub path: String,
    pub directory_type: DirectoryType,
    /// Content tag derived from the type (`movies`, `tvshows`, ...).
    pub content: Option<String>,
    pub properties: Properties,
    pub art: Artwork,
    pub media_flags: BTreeMap<String, String>,
    pub media: Option<MediaRecord>,
    pub entries: Vec<Entry>,
}

impl Listing {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&Entry> {
        self.entries.first()
    }

    pub fn label(&self) -> Option<&str> {
        self.properties
            .text("title1")
            .or_else(|| self.properties.text("title"))
    }
}
