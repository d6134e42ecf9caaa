//! Spotify Web API client (client-credentials flow).
//!
//! Used for track detail, audio features, ISRC search, and text search.
//! The bearer token is cached and refreshed shortly before expiry.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::SpotifyCredentials;
use crate::error::{PipelineError, Result};

use super::ExternalTrackData;

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

pub struct SpotifyClient {
    credentials: SpotifyCredentials,
    client: Client,
    api_base: String,
    token_url: String,
    token: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: String,
    name: String,
    duration_ms: Option<i64>,
    artists: Vec<SpotifyArtist>,
    external_ids: Option<SpotifyExternalIds>,
    popularity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioFeatures {
    tempo: Option<f64>,
    key: Option<i32>,
    mode: Option<i32>,
    energy: Option<f64>,
    danceability: Option<f64>,
    valence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    items: Vec<SpotifyTrack>,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials, client: Client) -> Self {
        Self::with_urls(credentials, client, API_BASE, TOKEN_URL)
    }

    /// Base URLs are injectable for tests.
    pub fn with_urls(
        credentials: SpotifyCredentials,
        client: Client,
        api_base: &str,
        token_url: &str,
    ) -> Self {
        Self {
            credentials,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            token: RwLock::new(None),
        }
    }

    /// Fetch track detail plus audio features by Spotify ID.
    pub async fn track_with_features(&self, spotify_id: &str) -> Result<ExternalTrackData> {
        let track = self.get_track(spotify_id).await?;
        let mut data = self.track_to_data(track);
        // Audio features are a separate endpoint and may 404 independently.
        match self.audio_features(spotify_id).await {
            Ok(features) => apply_features(&mut data, features),
            Err(PipelineError::NotFound { .. }) => {
                debug!(spotify_id = spotify_id, "no audio features available");
            }
            Err(e) => return Err(e),
        }
        Ok(data)
    }

    /// Search by ISRC; returns the first hit.
    pub async fn search_by_isrc(&self, isrc: &str) -> Result<Option<ExternalTrackData>> {
        let query = format!("isrc:{}", isrc);
        self.search(&query).await
    }

    /// Text search by artist and title; returns the first hit.
    pub async fn search_text(&self, artist: &str, title: &str) -> Result<Option<ExternalTrackData>> {
        let query = format!("artist:\"{}\" track:\"{}\"", artist, title);
        self.search(&query).await
    }

    async fn search(&self, query: &str) -> Result<Option<ExternalTrackData>> {
        let url = format!(
            "{}/search?q={}&type=track&limit=5",
            self.api_base,
            urlencoding::encode(query)
        );
        let response: SearchResponse = self.get_json(&url).await?;
        let mut best = response.tracks.items.into_iter().next();
        Ok(best.take().map(|track| {
            let id = track.id.clone();
            let mut data = self.track_to_data(track);
            data.external_id = Some(id);
            data
        }))
    }

    async fn get_track(&self, spotify_id: &str) -> Result<SpotifyTrack> {
        let url = format!("{}/tracks/{}", self.api_base, spotify_id);
        self.get_json(&url).await
    }

    async fn audio_features(&self, spotify_id: &str) -> Result<AudioFeatures> {
        let url = format!("{}/audio-features/{}", self.api_base, spotify_id);
        self.get_json(&url).await
    }

    fn track_to_data(&self, track: SpotifyTrack) -> ExternalTrackData {
        ExternalTrackData {
            service: "spotify",
            external_id: Some(track.id),
            title: Some(track.name),
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            isrc: track.external_ids.and_then(|ids| ids.isrc),
            duration_ms: track.duration_ms,
            popularity: track.popularity,
            ..ExternalTrackData::empty("spotify")
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PipelineError::from_status(status.as_u16(), url, retry_after));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::Parse(format!("spotify response: {}", e)))
    }

    async fn bearer_token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(
                status.as_u16(),
                &self.token_url,
                None,
            ));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("spotify token: {}", e)))?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            // Refresh a minute early so in-flight calls never race expiry.
            expires_at: Instant::now()
                + Duration::from_secs(token.expires_in.saturating_sub(60)),
        };
        *self.token.write().await = Some(cached);
        Ok(token.access_token)
    }
}

fn apply_features(data: &mut ExternalTrackData, features: AudioFeatures) {
    data.bpm = features.tempo;
    data.key_pitch_class = features.key.filter(|k| (0..=11).contains(k));
    data.mode = features.mode.filter(|m| (0..=1).contains(m));
    data.energy = features.energy;
    data.danceability = features.danceability;
    data.valence = features.valence;
}
