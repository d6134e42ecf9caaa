//! Tidal API client (client-credentials flow): ISRC and text search.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::TidalCredentials;
use crate::error::{PipelineError, Result};

use super::ExternalTrackData;

const API_BASE: &str = "https://openapi.tidal.com/v2";
const TOKEN_URL: &str = "https://auth.tidal.com/v1/oauth2/token";

pub struct TidalClient {
    credentials: TidalCredentials,
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
struct TrackListResponse {
    data: Vec<TidalTrack>,
}

#[derive(Debug, Deserialize)]
struct TidalTrack {
    id: String,
    attributes: TidalTrackAttributes,
}

#[derive(Debug, Deserialize)]
struct TidalTrackAttributes {
    title: Option<String>,
    isrc: Option<String>,
    duration: Option<String>,
}

impl TidalClient {
    pub fn new(credentials: TidalCredentials, client: Client) -> Self {
        Self::with_urls(credentials, client, API_BASE, TOKEN_URL)
    }

    pub fn with_urls(
        credentials: TidalCredentials,
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

    pub async fn search_by_isrc(&self, isrc: &str) -> Result<Option<ExternalTrackData>> {
        let url = format!(
            "{}/tracks?filter%5Bisrc%5D={}&countryCode=US",
            self.api_base,
            urlencoding::encode(isrc)
        );
        let response: TrackListResponse = self.get_json(&url).await?;
        Ok(response.data.into_iter().next().map(to_data))
    }

    pub async fn search_text(&self, artist: &str, title: &str) -> Result<Option<ExternalTrackData>> {
        let query = format!("{} {}", artist, title);
        let url = format!(
            "{}/searchresults/{}/relationships/tracks?countryCode=US",
            self.api_base,
            urlencoding::encode(&query)
        );
        let response: TrackListResponse = self.get_json(&url).await?;
        Ok(response.data.into_iter().next().map(to_data))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.bearer_token().await?;
        let response = self.client.get(url).bearer_auth(&token).send().await?;
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
            .map_err(|e| PipelineError::Parse(format!("tidal response: {}", e)))
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
            .map_err(|e| PipelineError::Parse(format!("tidal token: {}", e)))?;

        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60)),
        });
        Ok(token.access_token)
    }
}

fn to_data(track: TidalTrack) -> ExternalTrackData {
    ExternalTrackData {
        service: "tidal",
        external_id: Some(track.id),
        title: track.attributes.title,
        isrc: track.attributes.isrc,
        duration_ms: track
            .attributes
            .duration
            .as_deref()
            .and_then(parse_iso8601_duration_ms),
        ..ExternalTrackData::empty("tidal")
    }
}

/// Parse the subset of ISO-8601 durations Tidal emits ("PT3M32S").
fn parse_iso8601_duration_ms(raw: &str) -> Option<i64> {
    let rest = raw.strip_prefix("PT")?;
    let mut total_secs: i64 = 0;
    let mut number = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            let value: f64 = number.parse().ok()?;
            number.clear();
            match c {
                'H' => total_secs += (value * 3600.0) as i64,
                'M' => total_secs += (value * 60.0) as i64,
                'S' => total_secs += value as i64,
                _ => return None,
            }
        }
    }
    Some(total_secs * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_duration() {
        assert_eq!(parse_iso8601_duration_ms("PT3M32S"), Some(212_000));
        assert_eq!(parse_iso8601_duration_ms("PT1H2M3S"), Some(3_723_000));
        assert_eq!(parse_iso8601_duration_ms("PT45S"), Some(45_000));
        assert_eq!(parse_iso8601_duration_ms("3M"), None);
    }
}
