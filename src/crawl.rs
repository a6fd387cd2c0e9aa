//! Crawl session: turns catalog responses into graph mutations.
//!
//! Every catalog call covers one unit of work (a search page, a playlist page,
//! an audio-features batch, or a single per-artist lookup). A failing unit is
//! recorded as a [`SkippedReason`], logged, and treated as empty; the crawl
//! moves on to the next unit. Units are issued one at a time and all graph
//! mutation happens on the thread that owns the session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{
    parse_playlist_id, ArtistObject, AudioFeaturesObject, CatalogApi, CatalogError, TrackObject,
    AUDIO_FEATURES_BATCH, PAGE_SIZE,
};
use crate::graph::Graph;
use crate::models::{
    AlbumType, Artist, AttrValue, Attrs, CrawlStats, Playlist, Track, TrackEntry, GENRES,
    POPULARITY, SEEN,
};
use crate::progress::{create_progress_bar, log_progress, Phase};

/// Default cap on tracks fetched per name search
pub const DEFAULT_MAX_TRACKS: u32 = 1000;

/// Audio features merged into tracks unless configured otherwise
pub const DEFAULT_AUDIO_FEATURES: &[&str] = &[
    "danceability",
    "energy",
    "key",
    "loudness",
    "mode",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo",
];

#[derive(Clone, Debug)]
pub struct CrawlConfig {
    /// Stop paginating a name search once this many results were requested
    pub max_tracks: u32,
    /// Feature names merged into tracks; anything else the catalog returns is ignored
    pub audio_features: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_tracks: DEFAULT_MAX_TRACKS,
            audio_features: DEFAULT_AUDIO_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A unit of work that yielded nothing because the catalog call failed.
#[derive(Debug, Error)]
pub enum SkippedReason {
    #[error("search page for '{query}' at offset {offset}: {source}")]
    SearchPage {
        query: String,
        offset: u32,
        source: CatalogError,
    },
    #[error("top tracks for {artist} ({artist_id}): {source}")]
    TopTracks {
        artist_id: String,
        artist: String,
        source: CatalogError,
    },
    #[error("related artists for {artist} ({artist_id}): {source}")]
    RelatedArtists {
        artist_id: String,
        artist: String,
        source: CatalogError,
    },
    #[error("audio features batch {batch} ({size} tracks): {source}")]
    AudioFeatures {
        batch: usize,
        size: usize,
        source: CatalogError,
    },
    #[error("playlist {playlist_id}: {source}")]
    Playlist {
        playlist_id: String,
        source: CatalogError,
    },
    #[error("playlist {playlist_id} page at offset {offset}: {source}")]
    PlaylistPage {
        playlist_id: String,
        offset: u32,
        source: CatalogError,
    },
}

// ============================================================================
// Response Conversion
// ============================================================================

/// Build an artist from a catalog payload.
///
/// The artist is marked seen when the caller asks for it or when `graph`
/// already has this ID marked seen, so the flag never reverts within a session.
pub fn artist_from_response(response: &ArtistObject, seen: bool, graph: &Graph) -> Artist {
    let mut attrs = Attrs::new();
    if let Some(popularity) = response.popularity {
        attrs.insert(POPULARITY, f64::from(popularity));
    }
    if let Some(genres) = &response.genres {
        attrs.insert(GENRES, genres.clone());
    }
    if seen || graph.is_seen(&response.id) {
        attrs.insert(SEEN, true);
    }

    Artist::new(response.id.clone(), response.name.clone()).with_attrs(attrs)
}

/// Build a track from a catalog payload. None for tracks without an ID
/// (local files in playlists).
pub fn track_from_response(response: &TrackObject) -> Option<Track> {
    let id = response.id.as_ref()?;
    Some(Track::new(
        id.clone(),
        response.name.clone(),
        response.album.name.clone(),
        AlbumType::from(response.album.album_type.as_deref()),
    ))
}

fn entry_from_response(response: &TrackObject, seen: bool, graph: &Graph) -> Option<TrackEntry> {
    let track = track_from_response(response)?;
    let artists = response
        .artists
        .iter()
        .map(|a| artist_from_response(a, seen, graph))
        .collect();
    Some((track, artists))
}

/// Pick the configured features out of a catalog result.
fn select_features(result: &AudioFeaturesObject, names: &[String]) -> Attrs {
    names
        .iter()
        .filter_map(|name| {
            let value = result.features.get(name).and_then(AttrValue::from_json)?;
            Some((name.clone(), value))
        })
        .collect()
}

/// Entries deduplicated by track display name. A later entry with the same
/// name replaces the earlier one but keeps its position.
#[derive(Default)]
struct EntriesByName {
    entries: Vec<TrackEntry>,
    positions: FxHashMap<String, usize>,
}

impl EntriesByName {
    fn insert(&mut self, entry: TrackEntry) {
        match self.positions.get(&entry.0.name) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(entry.0.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn into_vec(self) -> Vec<TrackEntry> {
        self.entries
    }
}

/// Offset of the page after the one at `offset`. Saturates so a limit near
/// `u32::MAX` ends pagination instead of wrapping.
fn next_offset(offset: u32) -> u32 {
    offset.saturating_add(PAGE_SIZE)
}

// ============================================================================
// Session
// ============================================================================

pub struct CrawlSession<C: CatalogApi> {
    catalog: C,
    graph: Graph,
    config: CrawlConfig,
    stats: CrawlStats,
    skipped: Vec<SkippedReason>,
    stop: Arc<AtomicBool>,
}

impl<C: CatalogApi> CrawlSession<C> {
    pub fn new(catalog: C, config: CrawlConfig) -> Self {
        Self::with_graph(catalog, Graph::new(), config)
    }

    /// Resume a crawl on top of a previously persisted graph.
    pub fn with_graph(catalog: C, graph: Graph, config: CrawlConfig) -> Self {
        Self {
            catalog,
            graph,
            config,
            stats: CrawlStats::default(),
            skipped: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    /// Every unit of work skipped so far, in order
    pub fn skipped(&self) -> &[SkippedReason] {
        &self.skipped
    }

    /// Flag that stops the session before its next unit of work once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Record a skipped unit of work and yield None, or pass the outcome through.
    fn attempt<T>(&mut self, outcome: Result<T, SkippedReason>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(reason) => {
                self.skip(reason);
                None
            }
        }
    }

    fn skip(&mut self, reason: SkippedReason) {
        warn!("Skipping {}", reason);
        match &reason {
            SkippedReason::SearchPage { .. } => self.stats.search_pages_skipped += 1,
            SkippedReason::TopTracks { .. } => self.stats.top_tracks_skipped += 1,
            SkippedReason::RelatedArtists { .. } => self.stats.related_skipped += 1,
            SkippedReason::AudioFeatures { .. } => self.stats.feature_batches_skipped += 1,
            SkippedReason::Playlist { .. } => self.stats.playlists_failed += 1,
            SkippedReason::PlaylistPage { .. } => self.stats.playlist_pages_skipped += 1,
        }
        self.skipped.push(reason);
    }

    /// Search tracks by artist name, one page at a time.
    ///
    /// Stops when the reported total is exhausted or `max_tracks` results were
    /// requested. A failing page is skipped, not retried. Only results
    /// crediting an artist named exactly `artist_name` are kept, deduplicated
    /// by track name.
    pub fn search_tracks(&mut self, artist_name: &str, seen: bool) -> Vec<TrackEntry> {
        let mut entries = EntriesByName::default();
        let mut offset = 0;
        let mut total: Option<u32> = None;

        while offset < self.config.max_tracks && total.map_or(true, |t| offset < t) {
            if self.stopped() {
                break;
            }

            let page_offset = offset;
            offset = next_offset(offset);
            let outcome = self
                .catalog
                .search_tracks(artist_name, PAGE_SIZE, page_offset)
                .map_err(|source| SkippedReason::SearchPage {
                    query: artist_name.to_string(),
                    offset: page_offset,
                    source,
                });
            let Some(page) = self.attempt(outcome) else {
                continue;
            };
            self.stats.search_pages_fetched += 1;
            total = Some(page.total);

            if page.items.is_empty() {
                break;
            }

            for result in &page.items {
                if !result.artists.iter().any(|a| a.name == artist_name) {
                    continue;
                }
                if let Some(entry) = entry_from_response(result, seen, &self.graph) {
                    entries.insert(entry);
                }
            }
        }

        let entries = entries.into_vec();
        debug!("Search for '{}' kept {} tracks", artist_name, entries.len());
        entries
    }

    /// Top tracks of an artist. Empty on failure.
    pub fn top_tracks(&mut self, artist: &Artist, seen: bool) -> Vec<TrackEntry> {
        let outcome = self
            .catalog
            .artist_top_tracks(&artist.id)
            .map_err(|source| SkippedReason::TopTracks {
                artist_id: artist.id.clone(),
                artist: artist.name.clone(),
                source,
            });
        let Some(results) = self.attempt(outcome) else {
            return Vec::new();
        };
        self.stats.top_tracks_fetched += 1;

        let mut entries = EntriesByName::default();
        for result in &results {
            if let Some(entry) = entry_from_response(result, seen, &self.graph) {
                entries.insert(entry);
            }
        }
        entries.into_vec()
    }

    /// Related artists of an artist. Empty on failure.
    pub fn related_artists(&mut self, artist: &Artist, seen: bool) -> Vec<Artist> {
        let outcome = self
            .catalog
            .artist_related_artists(&artist.id)
            .map_err(|source| SkippedReason::RelatedArtists {
                artist_id: artist.id.clone(),
                artist: artist.name.clone(),
                source,
            });
        let Some(results) = self.attempt(outcome) else {
            return Vec::new();
        };
        self.stats.related_fetched += 1;

        results
            .iter()
            .map(|a| artist_from_response(a, seen, &self.graph))
            .collect()
    }

    /// Merge the configured audio features into `tracks`, one batch at a time.
    /// A failing batch leaves its tracks untouched.
    ///
    /// Returns how many leading tracks had their batch attempted. This is
    /// less than `tracks.len()` only when a stop was requested.
    pub fn get_audio_features(&mut self, tracks: &mut [Track]) -> usize {
        let mut attempted = 0;
        for (batch_no, batch) in tracks.chunks_mut(AUDIO_FEATURES_BATCH).enumerate() {
            if self.stopped() {
                break;
            }
            attempted += batch.len();

            let ids: Vec<String> = batch.iter().map(|t| t.id.clone()).collect();
            let outcome = self
                .catalog
                .audio_features(&ids)
                .map_err(|source| SkippedReason::AudioFeatures {
                    batch: batch_no,
                    size: batch.len(),
                    source,
                });
            let Some(results) = self.attempt(outcome) else {
                continue;
            };
            self.stats.feature_batches_fetched += 1;

            for result in results.iter().flatten() {
                let features = select_features(result, &self.config.audio_features);
                for track in batch.iter_mut().filter(|t| t.id == result.id) {
                    track.set_attrs(features.clone());
                    self.stats.tracks_enriched += 1;
                }
            }
        }
        attempted
    }

    /// Fetch a playlist and all its entries.
    ///
    /// Returns [`Playlist::placeholder`] when the playlist lookup itself fails.
    /// Entry pages that fail are skipped.
    pub fn get_playlist(&mut self, playlist_id: &str) -> Playlist {
        let outcome = self
            .catalog
            .playlist(playlist_id)
            .map_err(|source| SkippedReason::Playlist {
                playlist_id: playlist_id.to_string(),
                source,
            });
        let Some(playlist) = self.attempt(outcome) else {
            return Playlist::placeholder();
        };

        let total = playlist.tracks.total;
        let mut entries = EntriesByName::default();
        let mut offset = 0;

        while offset < total {
            if self.stopped() {
                break;
            }

            let page_offset = offset;
            offset = next_offset(offset);
            let outcome = self
                .catalog
                .playlist_tracks(playlist_id, PAGE_SIZE, page_offset)
                .map_err(|source| SkippedReason::PlaylistPage {
                    playlist_id: playlist_id.to_string(),
                    offset: page_offset,
                    source,
                });
            let Some(page) = self.attempt(outcome) else {
                continue;
            };

            if page.items.is_empty() {
                break;
            }

            for track in page.items.iter().filter_map(|item| item.track.as_ref()) {
                if let Some(entry) = entry_from_response(track, false, &self.graph) {
                    entries.insert(entry);
                }
            }
        }

        Playlist {
            id: playlist_id.to_string(),
            name: playlist.name,
            entries: entries.into_vec(),
        }
    }

    // ========================================================================
    // Crawl Driver
    // ========================================================================

    /// Enrich entries whose track is new to the graph, insert them, and return
    /// every credited artist.
    ///
    /// Tracks whose feature batch was never attempted because of a stop are
    /// left out of the graph: once inserted, a track can no longer gain
    /// features.
    fn ingest(&mut self, entries: Vec<TrackEntry>) -> Vec<Artist> {
        let mut queued: FxHashSet<String> = FxHashSet::default();
        let mut tracks = Vec::new();
        let mut credits = Vec::new();
        let mut credited = Vec::new();

        for (track, artists) in entries {
            credited.extend(artists.iter().cloned());
            if self.graph.contains(&track.id) || !queued.insert(track.id.clone()) {
                continue;
            }
            tracks.push(track);
            credits.push(artists);
        }

        let attempted = self.get_audio_features(&mut tracks);
        if attempted < tracks.len() {
            info!(
                "Stop requested; leaving {} new tracks for the next run",
                tracks.len() - attempted
            );
        }

        for (track, artists) in tracks.into_iter().zip(credits).take(attempted) {
            self.graph.put_track(track, artists);
            self.stats.tracks_added += 1;
        }
        credited
    }

    /// Resolve seed artist names to catalog artists using the first search
    /// page. Names without an exact match are dropped.
    pub fn resolve_seeds(&mut self, names: &[String]) -> Vec<Artist> {
        let mut seeds = Vec::new();
        for name in names {
            let outcome = self
                .catalog
                .search_tracks(name, PAGE_SIZE, 0)
                .map_err(|source| SkippedReason::SearchPage {
                    query: name.clone(),
                    offset: 0,
                    source,
                });
            let Some(page) = self.attempt(outcome) else {
                continue;
            };
            self.stats.search_pages_fetched += 1;

            let found = page
                .items
                .iter()
                .flat_map(|t| t.artists.iter())
                .find(|a| &a.name == name);
            match found {
                Some(raw) => seeds.push(artist_from_response(raw, false, &self.graph)),
                None => warn!("No catalog artist named '{}'; skipping seed", name),
            }
        }
        seeds
    }

    /// Artists already in the graph that were never expanded
    pub fn pending_artists(&self) -> Vec<Artist> {
        self.graph.artists().filter(|a| !a.is_seen()).cloned().collect()
    }

    /// Expand one artist: its top tracks and name search go into the graph,
    /// it is marked seen, and the unseen co-credited and related artists are
    /// returned as the next frontier.
    ///
    /// None when a stop interrupted the expansion. The artist then stays
    /// unseen so a resumed crawl expands it again.
    pub fn expand_artist(&mut self, artist: &Artist) -> Option<Vec<Artist>> {
        let mut entries = self.top_tracks(artist, false);
        entries.extend(self.search_tracks(&artist.name, false));
        if self.stopped() {
            debug!("Expansion of {} interrupted after fetching tracks", artist.name);
            return None;
        }

        let mut candidates = self.ingest(entries);
        if self.stopped() {
            debug!("Expansion of {} interrupted while ingesting", artist.name);
            return None;
        }

        candidates.extend(self.related_artists(artist, false));
        self.graph.mark_seen(artist);
        self.stats.artists_expanded += 1;
        Some(self.graph.unseen_artists(candidates))
    }

    /// Breadth-first crawl from `frontier` until it is empty, `max_artists`
    /// artists were expanded, or a stop was requested. Returns the number of
    /// artists expanded.
    pub fn crawl(&mut self, frontier: Vec<Artist>, max_artists: usize) -> usize {
        let start = Instant::now();
        let mut queue: VecDeque<Artist> = VecDeque::new();
        let mut queued: FxHashSet<String> = FxHashSet::default();
        for artist in self.graph.unseen_artists(frontier) {
            queued.insert(artist.id.clone());
            queue.push_back(artist);
        }

        info!("Crawling from {} artists (budget {})", queue.len(), max_artists);
        let pb = create_progress_bar(Phase::Crawl, max_artists as u64, "Expanding artists");
        let mut expanded = 0;

        while expanded < max_artists {
            if self.stopped() {
                info!("Stop requested; {} artists left in frontier", queue.len());
                break;
            }
            let Some(artist) = queue.pop_front() else {
                break;
            };
            if self.graph.is_seen(&artist.id) {
                continue;
            }

            pb.set_message(format!("Expanding {}", artist.name));
            let Some(next) = self.expand_artist(&artist) else {
                info!("Stop requested; {} left unseen", artist.name);
                break;
            };
            expanded += 1;
            pb.inc(1);
            log_progress(Phase::Crawl, expanded as u64, max_artists as u64, 10);

            for candidate in next {
                if queued.insert(candidate.id.clone()) {
                    queue.push_back(candidate);
                }
            }
        }

        pb.finish_with_message(format!(
            "Expanded {} artists ({} nodes, {} edges)",
            expanded,
            self.graph.node_count(),
            self.graph.edge_count()
        ));
        self.stats.elapsed_seconds += start.elapsed().as_secs_f64();
        expanded
    }

    /// Ingest a playlist (ID, URI or URL) and return its unseen artists.
    pub fn crawl_playlist(&mut self, reference: &str) -> Vec<Artist> {
        let Some(playlist_id) = parse_playlist_id(reference) else {
            warn!("'{}' is not a playlist reference; skipping", reference);
            return Vec::new();
        };

        let playlist = self.get_playlist(&playlist_id);
        if playlist.is_placeholder() {
            return Vec::new();
        }

        info!(
            "Playlist '{}' has {} unique tracks",
            playlist.name,
            playlist.entries.len()
        );
        let credited = self.ingest(playlist.entries);
        self.stats.playlists_ingested += 1;
        self.graph.unseen_artists(credited)
    }
}
