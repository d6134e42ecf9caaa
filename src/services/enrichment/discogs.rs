//! Discogs release search: label and release metadata, plus label-filtered
//! artist attribution for the resolver's external tier.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

use super::ExternalTrackData;

const API_BASE: &str = "https://api.discogs.com";

pub struct DiscogsClient {
    token: String,
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: i64,
    title: Option<String>,
    label: Option<Vec<String>>,
    genre: Option<Vec<String>>,
    year: Option<String>,
}

impl DiscogsClient {
    pub fn new(token: String, client: Client) -> Self {
        Self::with_base_url(token, client, API_BASE)
    }

    pub fn with_base_url(token: String, client: Client, api_base: &str) -> Self {
        Self {
            token,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Release search by free text, optionally constrained to a label.
    pub async fn search_release(
        &self,
        query: &str,
        label: Option<&str>,
    ) -> Result<Option<ExternalTrackData>> {
        let mut url = format!(
            "{}/database/search?q={}&type=release&per_page=5&token={}",
            self.api_base,
            urlencoding::encode(query),
            urlencoding::encode(&self.token)
        );
        if let Some(label) = label {
            url.push_str(&format!("&label={}", urlencoding::encode(label)));
        }

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PipelineError::from_status(status.as_u16(), &url, retry_after));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("discogs response: {}", e)))?;

        Ok(parsed.results.into_iter().next().map(|result| {
            // Discogs release titles are "Artist - Title".
            let (artist, title) = result
                .title
                .as_deref()
                .and_then(|t| t.split_once(" - "))
                .map(|(a, b)| (Some(a.trim().to_string()), Some(b.trim().to_string())))
                .unwrap_or((None, result.title.clone()));
            ExternalTrackData {
                service: "discogs",
                external_id: Some(result.id.to_string()),
                title,
                artists: artist.into_iter().collect(),
                label: result.label.and_then(|l| l.into_iter().next()),
                genre: result.genre.and_then(|g| g.into_iter().next()),
                release_year: result.year.and_then(|y| y.parse().ok()),
                ..ExternalTrackData::empty("discogs")
            }
        }))
    }
}
