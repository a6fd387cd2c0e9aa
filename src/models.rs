//! Core entity models for the track/artist graph.
//!
//! Tracks and artists have a fixed identity (the catalog ID) and an open
//! attribute map that is merged into over the lifetime of a crawl.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

// ============================================================================
// Attribute Keys
// ============================================================================

/// Artist popularity as reported by the catalog (0-100)
pub const POPULARITY: &str = "popularity";

/// Artist genres
pub const GENRES: &str = "genres";

/// Sticky flag: the artist's neighborhood has been expanded
pub const SEEN: &str = "seen";

// ============================================================================
// Attribute Values
// ============================================================================

/// A single attribute value.
///
/// Untagged so that the JSON encoding is the plain scalar or array, which is
/// also how values are stored in the persisted `attr.*` columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    /// Convert a raw JSON value coming from the catalog.
    /// Returns None for null, objects and arrays that are not all strings.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Some(AttrValue::Flag(*b)),
            Value::Number(n) => n.as_f64().map(AttrValue::Number),
            Value::String(s) => Some(AttrValue::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(AttrValue::List),
            Value::Null | Value::Object(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Number(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Flag(b)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(items: Vec<String>) -> Self {
        AttrValue::List(items)
    }
}

/// Open attribute map with merge-on-insert semantics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attrs(BTreeMap<String, AttrValue>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` into this map, overwriting on key collision.
    pub fn set_attrs(&mut self, other: Attrs) {
        self.0.extend(other.0);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, AttrValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, AttrValue)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (String, AttrValue)>>(iter: I) -> Self {
        Attrs(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Attrs {
    type Item = (&'a String, &'a AttrValue);
    type IntoIter = btree_map::Iter<'a, String, AttrValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Identity key used by every set/map operation over entities.
///
/// Two records with the same identity are the same entity even when their
/// attribute snapshots differ.
pub trait Identity {
    fn identity(&self) -> &str;
}

/// Keep the first occurrence of each identity, preserving input order.
pub fn dedup_by_identity<T: Identity>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = rustc_hash::FxHashSet::default();
    items
        .into_iter()
        .filter(|item| seen.insert(item.identity().to_string()))
        .collect()
}

// ============================================================================
// Catalog Models
// ============================================================================

/// Album type as reported by the catalog.
///
/// Types outside the common three are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumType {
    Album,
    Single,
    Compilation,
    Other(String),
    Unknown,
}

impl AlbumType {
    /// Catalog string for this type; None for Unknown (persisted as null)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AlbumType::Album => Some("album"),
            AlbumType::Single => Some("single"),
            AlbumType::Compilation => Some("compilation"),
            AlbumType::Other(s) => Some(s),
            AlbumType::Unknown => None,
        }
    }
}

impl From<Option<&str>> for AlbumType {
    fn from(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            Some("album") => AlbumType::Album,
            Some("single") => AlbumType::Single,
            Some("compilation") => AlbumType::Compilation,
            Some("") | None => AlbumType::Unknown,
            Some(other) => AlbumType::Other(other.to_string()),
        }
    }
}

/// A track node. Audio features are merged into `attrs` after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub album: String,
    pub album_type: AlbumType,
    pub attrs: Attrs,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        album: impl Into<String>,
        album_type: AlbumType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            album: album.into(),
            album_type,
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn set_attrs(&mut self, attrs: Attrs) {
        self.attrs.set_attrs(attrs);
    }
}

impl Identity for Track {
    fn identity(&self) -> &str {
        &self.id
    }
}

/// An artist node.
///
/// `attrs` recognizes `popularity`, `genres` and `seen`; `seen` is only ever
/// present as `true`.
#[derive(Clone, Debug, PartialEq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub attrs: Attrs,
}

impl Artist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn set_attrs(&mut self, attrs: Attrs) {
        self.attrs.set_attrs(attrs);
    }

    pub fn popularity(&self) -> Option<f64> {
        self.attrs.get(POPULARITY).and_then(AttrValue::as_f64)
    }

    pub fn genres(&self) -> Option<&[String]> {
        self.attrs.get(GENRES).and_then(AttrValue::as_list)
    }

    pub fn is_seen(&self) -> bool {
        self.attrs
            .get(SEEN)
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_seen(&mut self) {
        self.attrs.insert(SEEN, true);
    }
}

impl Identity for Artist {
    fn identity(&self) -> &str {
        &self.id
    }
}

/// A track together with its credited artists, in credited order.
pub type TrackEntry = (Track, Vec<Artist>);

/// A playlist and its deduplicated entries.
///
/// An empty `id` is the sentinel for a failed lookup (see [`Playlist::placeholder`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub entries: Vec<TrackEntry>,
}

impl Playlist {
    pub fn placeholder() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            entries: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_empty()
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-session crawl counters, logged at the end of each phase.
#[derive(Default, Debug, Clone, Serialize)]
pub struct CrawlStats {
    // Search pagination
    pub search_pages_fetched: usize,
    pub search_pages_skipped: usize,

    // Per-artist lookups
    pub top_tracks_fetched: usize,
    pub top_tracks_skipped: usize,
    pub related_fetched: usize,
    pub related_skipped: usize,

    // Audio features
    pub feature_batches_fetched: usize,
    pub feature_batches_skipped: usize,
    pub tracks_enriched: usize,

    // Playlists
    pub playlists_ingested: usize,
    pub playlists_failed: usize,
    pub playlist_pages_skipped: usize,

    // Graph growth
    pub tracks_added: usize,
    pub artists_expanded: usize,

    // Timing
    pub elapsed_seconds: f64,
}

impl CrawlStats {
    /// Total units of work skipped because of a catalog failure
    pub fn total_skipped(&self) -> usize {
        self.search_pages_skipped
            + self.top_tracks_skipped
            + self.related_skipped
            + self.feature_batches_skipped
            + self.playlists_failed
            + self.playlist_pages_skipped
    }

    /// Log stats in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_attrs_overwrites_on_collision() {
        let mut artist = Artist::new("0001", "Noname");
        artist.attrs.insert(POPULARITY, 60.0);
        artist.attrs.insert(GENRES, vec!["chicago rap".to_string()]);

        let mut update = Attrs::new();
        update.insert(POPULARITY, 72.0);
        update.insert(SEEN, true);
        artist.set_attrs(update);

        assert_eq!(artist.popularity(), Some(72.0));
        assert_eq!(artist.genres(), Some(&["chicago rap".to_string()][..]));
        assert!(artist.is_seen());
    }

    #[test]
    fn test_dedup_by_identity_ignores_attrs() {
        let plain = Artist::new("0001", "Noname");
        let mut seen = Artist::new("0001", "Noname");
        seen.mark_seen();
        let other = Artist::new("0002", "Cam O'bi");

        let unique = dedup_by_identity(vec![plain.clone(), seen, other.clone()]);
        assert_eq!(unique, vec![plain, other]);

        let tracks = vec![
            Track::new("000", "Diddy Bop", "Telefone", AlbumType::Album),
            Track::new("000", "Diddy Bop (Remastered)", "Telefone", AlbumType::Album),
        ];
        assert_eq!(dedup_by_identity(tracks).len(), 1);
    }

    #[test]
    fn test_album_type_parsing() {
        assert_eq!(AlbumType::from(Some("album")), AlbumType::Album);
        assert_eq!(AlbumType::from(Some("single")), AlbumType::Single);
        assert_eq!(AlbumType::from(Some("compilation")), AlbumType::Compilation);
        assert_eq!(
            AlbumType::from(Some("appears_on")),
            AlbumType::Other("appears_on".to_string())
        );
        assert_eq!(AlbumType::from(Some("appears_on")).as_str(), Some("appears_on"));
        assert_eq!(AlbumType::from(Some("")), AlbumType::Unknown);
        assert_eq!(AlbumType::from(None), AlbumType::Unknown);
        assert_eq!(AlbumType::Unknown.as_str(), None);
    }

    #[test]
    fn test_attr_value_from_json() {
        let genres = serde_json::json!(["soul", "r&b"]);
        assert_eq!(
            AttrValue::from_json(&genres),
            Some(AttrValue::List(vec!["soul".into(), "r&b".into()]))
        );
        assert_eq!(AttrValue::from_json(&serde_json::json!(0.5)), Some(AttrValue::Number(0.5)));
        assert_eq!(AttrValue::from_json(&serde_json::Value::Null), None);
        assert_eq!(AttrValue::from_json(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn test_stats_total_skipped() {
        let stats = CrawlStats {
            search_pages_skipped: 2,
            feature_batches_skipped: 1,
            playlists_failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_skipped(), 4);
    }

    #[test]
    fn test_playlist_placeholder() {
        assert!(Playlist::placeholder().is_placeholder());
    }
}
