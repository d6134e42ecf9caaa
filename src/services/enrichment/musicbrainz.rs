//! MusicBrainz recording lookups.
//!
//! Requires a descriptive User-Agent and is limited to one request per
//! second; the client self-throttles the same way regardless of caller.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};

use crate::error::{PipelineError, Result};

use super::ExternalTrackData;

const API_BASE: &str = "https://musicbrainz.org/ws/2";
/// 1.1s between requests keeps us safely under the 1 rps limit.
const REQUEST_SPACING: Duration = Duration::from_millis(1_100);

pub struct MusicBrainzClient {
    client: Client,
    api_base: String,
    last_request: Arc<RwLock<Option<Instant>>>,
}

#[derive(Debug, Deserialize)]
struct IsrcResponse {
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct RecordingSearchResponse {
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
    title: Option<String>,
    #[serde(rename = "artist-credit")]
    artist_credit: Option<Vec<ArtistCredit>>,
    isrcs: Option<Vec<String>>,
    length: Option<i64>,
    score: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: String,
}

impl MusicBrainzClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, API_BASE)
    }

    pub fn with_base_url(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            last_request: Arc::new(RwLock::new(None)),
        }
    }

    /// Look up recordings carrying an ISRC.
    pub async fn lookup_by_isrc(&self, isrc: &str) -> Result<Option<ExternalTrackData>> {
        let url = format!(
            "{}/isrc/{}?fmt=json&inc=artist-credits",
            self.api_base,
            urlencoding::encode(isrc)
        );
        let response: IsrcResponse = match self.get_json(&url).await {
            Ok(response) => response,
            Err(PipelineError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(response
            .recordings
            .into_iter()
            .next()
            .map(|recording| to_data(recording, Some(isrc))))
    }

    /// Text search; may recover an ISRC for tracks that lack one.
    pub async fn search_recording(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<ExternalTrackData>> {
        let query = format!("recording:\"{}\" AND artist:\"{}\"", title, artist);
        let url = format!(
            "{}/recording?query={}&fmt=json&limit=5&inc=isrcs",
            self.api_base,
            urlencoding::encode(&query)
        );
        let response: RecordingSearchResponse = self.get_json(&url).await?;
        let best = response
            .recordings
            .into_iter()
            .max_by_key(|r| r.score.unwrap_or(0));
        Ok(best.map(|recording| to_data(recording, None)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.wait_for_rate_limit().await;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16(), url, None));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::Parse(format!("musicbrainz response: {}", e)))
    }

    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.write().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < REQUEST_SPACING {
                sleep(REQUEST_SPACING - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn to_data(recording: Recording, known_isrc: Option<&str>) -> ExternalTrackData {
    let isrc = recording
        .isrcs
        .as_ref()
        .and_then(|list| list.first().cloned())
        .or_else(|| known_isrc.map(|s| s.to_string()));
    ExternalTrackData {
        service: "musicbrainz",
        external_id: Some(recording.id),
        title: recording.title,
        artists: recording
            .artist_credit
            .unwrap_or_default()
            .into_iter()
            .map(|credit| credit.name)
            .collect(),
        isrc,
        duration_ms: recording.length,
        ..ExternalTrackData::empty("musicbrainz")
    }
}
