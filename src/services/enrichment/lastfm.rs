//! Last.fm track.getInfo: community tags and popularity.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

use super::ExternalTrackData;

const API_BASE: &str = "https://ws.audioscrobbler.com/2.0";

pub struct LastfmClient {
    api_key: String,
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TrackInfoResponse {
    track: Option<TrackInfo>,
}

#[derive(Debug, Deserialize)]
struct TrackInfo {
    name: Option<String>,
    listeners: Option<String>,
    toptags: Option<TopTags>,
}

#[derive(Debug, Deserialize)]
struct TopTags {
    tag: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

impl LastfmClient {
    pub fn new(api_key: String, client: Client) -> Self {
        Self::with_base_url(api_key, client, API_BASE)
    }

    pub fn with_base_url(api_key: String, client: Client, api_base: &str) -> Self {
        Self {
            api_key,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn track_info(&self, artist: &str, title: &str) -> Result<Option<ExternalTrackData>> {
        let url = format!(
            "{}/?method=track.getInfo&api_key={}&artist={}&track={}&format=json&autocorrect=1",
            self.api_base,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(artist),
            urlencoding::encode(title)
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16(), &url, None));
        }
        let parsed: TrackInfoResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("lastfm response: {}", e)))?;

        Ok(parsed.track.map(|info| ExternalTrackData {
            service: "lastfm",
            title: info.name,
            popularity: info.listeners.and_then(|l| l.parse().ok()),
            tags: info
                .toptags
                .map(|t| t.tag.into_iter().map(|tag| tag.name).collect())
                .unwrap_or_default(),
            ..ExternalTrackData::empty("lastfm")
        }))
    }
}
