//! Audio-feature fallbacks: AcousticBrainz by MusicBrainz ID, then
//! GetSongBPM text search. Both only ever fill fields that are still empty.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

use super::ExternalTrackData;

const ACOUSTICBRAINZ_BASE: &str = "https://acousticbrainz.org/api/v1";
const GETSONGBPM_BASE: &str = "https://api.getsongbpm.com";

pub struct AcousticBrainzClient {
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct LowLevelResponse {
    rhythm: Option<Rhythm>,
    tonal: Option<Tonal>,
}

#[derive(Debug, Deserialize)]
struct Rhythm {
    bpm: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Tonal {
    key_key: Option<String>,
    key_scale: Option<String>,
}

impl AcousticBrainzClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, ACOUSTICBRAINZ_BASE)
    }

    pub fn with_base_url(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn features_by_mbid(&self, mbid: &str) -> Result<Option<ExternalTrackData>> {
        let url = format!("{}/{}/low-level", self.api_base, mbid);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16(), &url, None));
        }
        let parsed: LowLevelResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("acousticbrainz response: {}", e)))?;

        let key_name = parsed.tonal.as_ref().and_then(|tonal| {
            let key = tonal.key_key.as_deref()?;
            let scale = tonal.key_scale.as_deref().unwrap_or("major");
            Some(format!("{} {}", key, scale))
        });

        Ok(Some(ExternalTrackData {
            service: "acousticbrainz",
            bpm: parsed.rhythm.and_then(|r| r.bpm),
            key_name,
            ..ExternalTrackData::empty("acousticbrainz")
        }))
    }
}

pub struct GetSongBpmClient {
    api_key: String,
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct GsbSearchResponse {
    search: Option<Vec<GsbSong>>,
}

#[derive(Debug, Deserialize)]
struct GsbSong {
    tempo: Option<String>,
    key_of: Option<String>,
}

impl GetSongBpmClient {
    pub fn new(api_key: String, client: Client) -> Self {
        Self::with_base_url(api_key, client, GETSONGBPM_BASE)
    }

    pub fn with_base_url(api_key: String, client: Client, api_base: &str) -> Self {
        Self {
            api_key,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn search(&self, artist: &str, title: &str) -> Result<Option<ExternalTrackData>> {
        let lookup = format!("song:{} artist:{}", title, artist);
        let url = format!(
            "{}/search/?type=both&lookup={}&api_key={}",
            self.api_base,
            urlencoding::encode(&lookup),
            urlencoding::encode(&self.api_key)
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16(), &url, None));
        }
        let parsed: GsbSearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("getsongbpm response: {}", e)))?;

        Ok(parsed
            .search
            .and_then(|songs| songs.into_iter().next())
            .map(|song| ExternalTrackData {
                service: "getsongbpm",
                bpm: song.tempo.and_then(|t| t.parse().ok()),
                key_name: song.key_of,
                ..ExternalTrackData::empty("getsongbpm")
            }))
    }
}
