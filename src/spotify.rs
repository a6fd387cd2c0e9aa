//! Spotify Web API client.
//!
//! Uses the client credentials flow; the access token is cached until shortly
//! before it expires. No retries or backoff happen here: a 429 surfaces as
//! [`CatalogError::RateLimited`] and the crawl skips that unit of work.

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::catalog::{
    ArtistObject, AudioFeaturesObject, CatalogApi, CatalogError, Paging, PlaylistItem,
    PlaylistObject, TrackObject, AUDIO_FEATURES_BATCH,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh the token this long before the reported expiry
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Paging<TrackObject>,
}

#[derive(Deserialize)]
struct TopTracksResponse {
    tracks: Vec<TrackObject>,
}

#[derive(Deserialize)]
struct RelatedArtistsResponse {
    artists: Vec<ArtistObject>,
}

#[derive(Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<AudioFeaturesObject>>,
}

pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    market: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: &str, client_secret: &str, market: &str) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            market: market.to_string(),
            token: Mutex::new(None),
        })
    }

    fn access_token(&self) -> Result<String, CatalogError> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| CatalogError::Auth("token cache poisoned".to_string()))?;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting new access token");
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Auth(format!("HTTP {}: {}", status, body)));
        }

        let token: TokenResponse = response.json()?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<T, CatalogError> {
        let token = self.access_token()?;
        let url = format!("{}{}", API_BASE, path);
        let response = build(self.client.get(&url).bearer_auth(token)).send()?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(CatalogError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let body = response.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl CatalogApi for SpotifyClient {
    fn search_tracks(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<TrackObject>, CatalogError> {
        let limit = limit.to_string();
        let offset = offset.to_string();
        let response: SearchResponse = self.get("/search", |req| {
            req.query(&[
                ("q", query),
                ("type", "track"),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
            ])
        })?;
        Ok(response.tracks)
    }

    fn artist_top_tracks(&self, artist_id: &str) -> Result<Vec<TrackObject>, CatalogError> {
        let path = format!("/artists/{}/top-tracks", artist_id);
        let response: TopTracksResponse =
            self.get(&path, |req| req.query(&[("market", self.market.as_str())]))?;
        Ok(response.tracks)
    }

    fn artist_related_artists(&self, artist_id: &str) -> Result<Vec<ArtistObject>, CatalogError> {
        let path = format!("/artists/{}/related-artists", artist_id);
        let response: RelatedArtistsResponse = self.get(&path, |req| req)?;
        Ok(response.artists)
    }

    fn audio_features(
        &self,
        track_ids: &[String],
    ) -> Result<Vec<Option<AudioFeaturesObject>>, CatalogError> {
        let ids = track_ids
            .iter()
            .take(AUDIO_FEATURES_BATCH)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let response: AudioFeaturesResponse =
            self.get("/audio-features", |req| req.query(&[("ids", ids.as_str())]))?;
        Ok(response.audio_features)
    }

    fn playlist(&self, playlist_id: &str) -> Result<PlaylistObject, CatalogError> {
        let path = format!("/playlists/{}", playlist_id);
        self.get(&path, |req| req.query(&[("fields", "id,name,tracks.total")]))
    }

    fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<PlaylistItem>, CatalogError> {
        let path = format!("/playlists/{}/tracks", playlist_id);
        let limit = limit.to_string();
        let offset = offset.to_string();
        self.get(&path, |req| {
            req.query(&[("limit", limit.as_str()), ("offset", offset.as_str())])
        })
    }
}
