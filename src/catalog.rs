//! Catalog API boundary.
//!
//! The crawl session only talks to the catalog through [`CatalogApi`], so the
//! HTTP client in `spotify` can be swapped for a scripted fake in tests.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Page size used for search and playlist pagination
pub const PAGE_SIZE: u32 = 50;

/// Maximum number of track IDs per audio-features lookup
pub const AUDIO_FEATURES_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Clone, Debug, Deserialize)]
pub struct ArtistObject {
    pub id: String,
    pub name: String,
    /// Only present on full artist objects, not on the simplified ones
    /// embedded in tracks.
    #[serde(default)]
    pub popularity: Option<u32>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AlbumObject {
    pub name: String,
    #[serde(default)]
    pub album_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrackObject {
    /// Null for local files inside playlists
    pub id: Option<String>,
    pub name: String,
    pub album: AlbumObject,
    pub artists: Vec<ArtistObject>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Paging<T> {
    pub items: Vec<T>,
    pub total: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<TrackObject>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaylistTracksRef {
    pub total: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaylistObject {
    pub id: String,
    pub name: String,
    pub tracks: PlaylistTracksRef,
}

/// Audio features for one track. Feature values are kept raw; the crawl
/// session picks the configured ones.
#[derive(Clone, Debug, Deserialize)]
pub struct AudioFeaturesObject {
    pub id: String,
    #[serde(flatten)]
    pub features: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Client Trait
// ============================================================================

/// Operations the crawl needs from the remote catalog. Every call may fail
/// transiently; callers treat a failure as "this unit of work yields nothing".
pub trait CatalogApi {
    fn search_tracks(&self, query: &str, limit: u32, offset: u32)
        -> Result<Paging<TrackObject>, CatalogError>;

    fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<TrackObject>, CatalogError>;

    fn artist_related_artists(&self, artist_id: &str) -> Result<Vec<ArtistObject>, CatalogError>;

    /// At most [`AUDIO_FEATURES_BATCH`] ids per call. Unknown ids come back as None.
    fn audio_features(
        &self,
        track_ids: &[String],
    ) -> Result<Vec<Option<AudioFeaturesObject>>, CatalogError>;

    fn playlist(&self, playlist_id: &str) -> Result<PlaylistObject, CatalogError>;

    fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<PlaylistItem>, CatalogError>;
}

// ============================================================================
// Playlist References
// ============================================================================

static PLAYLIST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://open\.spotify\.com/(?:[a-z-]+/)?playlist/|spotify:playlist:)([A-Za-z0-9]+)")
        .unwrap()
});

static PLAYLIST_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());

/// Extract a playlist ID from a bare ID, a `spotify:playlist:` URI or an
/// `open.spotify.com` URL (query string ignored).
pub fn parse_playlist_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(caps) = PLAYLIST_URL.captures(input) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    if PLAYLIST_ID.is_match(input) {
        return Some(input.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playlist_id() {
        assert_eq!(
            parse_playlist_id("37i9dQZF1DXcBWIGoYBM5M"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(
            parse_playlist_id("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(
            parse_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc123"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(
            parse_playlist_id("https://open.spotify.com/intl-de/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(parse_playlist_id("not a playlist"), None);
        assert_eq!(parse_playlist_id(""), None);
    }

    #[test]
    fn test_decode_track_object() {
        let raw = serde_json::json!({
            "name": "Diddy Bop",
            "id": "000",
            "album": { "name": "Telefone", "album_type": "album" },
            "artists": [
                { "id": "0001", "name": "Noname" },
                { "id": "0002", "name": "Cam O'bi" }
            ]
        });
        let track: TrackObject = serde_json::from_value(raw).unwrap();
        assert_eq!(track.id.as_deref(), Some("000"));
        assert_eq!(track.artists.len(), 2);
        assert_eq!(track.artists[0].popularity, None);
    }

    #[test]
    fn test_decode_audio_features() {
        let raw = serde_json::json!({
            "id": "000",
            "danceability": 0.71,
            "energy": 0.52,
            "type": "audio_features"
        });
        let features: AudioFeaturesObject = serde_json::from_value(raw).unwrap();
        assert_eq!(features.id, "000");
        assert_eq!(features.features.get("energy"), Some(&serde_json::json!(0.52)));
        assert!(!features.features.contains_key("id"));
    }
}
