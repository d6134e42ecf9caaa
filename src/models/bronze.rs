//! Bronze-layer models: raw scrape records exactly as harvested.
//!
//! Bronze rows are append-only. `raw_data` is stored verbatim and never
//! mutated after insert; the transformer only flips the `processed` flag.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PipelineError;

/// Identifier of a scraping or enrichment source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Tracklists1001,
    Mixesdb,
    Setlistfm,
    Reddit,
    Spotify,
    Tidal,
    Musicbrainz,
    Discogs,
    Lastfm,
    Acousticbrainz,
    Getsongbpm,
    Beatport,
    AppleMusic,
    Soundcloud,
    Deezer,
    YoutubeMusic,
}

impl SourceId {
    pub const ALL: [SourceId; 16] = [
        SourceId::Tracklists1001,
        SourceId::Mixesdb,
        SourceId::Setlistfm,
        SourceId::Reddit,
        SourceId::Spotify,
        SourceId::Tidal,
        SourceId::Musicbrainz,
        SourceId::Discogs,
        SourceId::Lastfm,
        SourceId::Acousticbrainz,
        SourceId::Getsongbpm,
        SourceId::Beatport,
        SourceId::AppleMusic,
        SourceId::Soundcloud,
        SourceId::Deezer,
        SourceId::YoutubeMusic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracklists1001 => "1001tracklists",
            Self::Mixesdb => "mixesdb",
            Self::Setlistfm => "setlistfm",
            Self::Reddit => "reddit",
            Self::Spotify => "spotify",
            Self::Tidal => "tidal",
            Self::Musicbrainz => "musicbrainz",
            Self::Discogs => "discogs",
            Self::Lastfm => "lastfm",
            Self::Acousticbrainz => "acousticbrainz",
            Self::Getsongbpm => "getsongbpm",
            Self::Beatport => "beatport",
            Self::AppleMusic => "apple_music",
            Self::Soundcloud => "soundcloud",
            Self::Deezer => "deezer",
            Self::YoutubeMusic => "youtube_music",
        }
    }

    /// Sources the scheduler drives with search seeds (the scraping sites,
    /// as opposed to enrichment APIs called per track).
    pub fn is_scraping_source(&self) -> bool {
        matches!(
            self,
            Self::Tracklists1001 | Self::Mixesdb | Self::Setlistfm | Self::Reddit
        )
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| PipelineError::Validation(format!("unknown source id: {}", s)))
    }
}

/// The kind of record a bronze row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeType {
    Artist,
    Track,
    Playlist,
    PlaylistTrack,
    TrackArtist,
    TrackAdjacency,
}

impl ScrapeType {
    /// Transformer processing order: parents before the rows that reference
    /// them.
    pub const DEPENDENCY_ORDER: [ScrapeType; 6] = [
        ScrapeType::Artist,
        ScrapeType::Track,
        ScrapeType::Playlist,
        ScrapeType::PlaylistTrack,
        ScrapeType::TrackAdjacency,
        ScrapeType::TrackArtist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Track => "track",
            Self::Playlist => "playlist",
            Self::PlaylistTrack => "playlist_track",
            Self::TrackArtist => "track_artist",
            Self::TrackAdjacency => "track_adjacency",
        }
    }
}

impl fmt::Display for ScrapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" => Ok(Self::Artist),
            "track" => Ok(Self::Track),
            "playlist" => Ok(Self::Playlist),
            "playlist_track" => Ok(Self::PlaylistTrack),
            "track_artist" => Ok(Self::TrackArtist),
            "track_adjacency" => Ok(Self::TrackAdjacency),
            other => Err(PipelineError::Validation(format!(
                "unknown scrape type: {}",
                other
            ))),
        }
    }
}

/// One raw scrape row as stored in `raw_scrape_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScrape {
    pub scrape_id: Uuid,
    pub source: SourceId,
    pub scrape_type: ScrapeType,
    pub raw_data: Value,
    pub scraped_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Typed view over a bronze payload, one variant per scrape type.
///
/// Adapters produce loose JSON; this is the validating constructor the
/// transformer matches over. Unknown top-level fields are rejected so adapter
/// drift surfaces as a parse error instead of silent data loss.
#[derive(Debug, Clone, PartialEq)]
pub enum BronzePayload {
    Artist(ArtistBronze),
    Track(TrackBronze),
    Playlist(PlaylistBronze),
    PlaylistTrack(PlaylistTrackBronze),
    TrackArtist(TrackArtistBronze),
    TrackAdjacency(TrackAdjacencyBronze),
}

impl BronzePayload {
    /// Parse a raw JSON payload according to its scrape type.
    pub fn from_raw(scrape_type: ScrapeType, raw: &Value) -> Result<Self, PipelineError> {
        let parse_err =
            |e: serde_json::Error| PipelineError::Parse(format!("{} payload: {}", scrape_type, e));
        match scrape_type {
            ScrapeType::Artist => serde_json::from_value(raw.clone())
                .map(Self::Artist)
                .map_err(parse_err),
            ScrapeType::Track => serde_json::from_value(raw.clone())
                .map(Self::Track)
                .map_err(parse_err),
            ScrapeType::Playlist => serde_json::from_value(raw.clone())
                .map(Self::Playlist)
                .map_err(parse_err),
            ScrapeType::PlaylistTrack => serde_json::from_value(raw.clone())
                .map(Self::PlaylistTrack)
                .map_err(parse_err),
            ScrapeType::TrackArtist => serde_json::from_value(raw.clone())
                .map(Self::TrackArtist)
                .map_err(parse_err),
            ScrapeType::TrackAdjacency => serde_json::from_value(raw.clone())
                .map(Self::TrackAdjacency)
                .map_err(parse_err),
        }
    }
}

/// Raw artist record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtistBronze {
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub spotify_id: Option<String>,
    #[serde(default)]
    pub musicbrainz_id: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Raw track record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackBronze {
    #[serde(default)]
    pub artist_name: String,
    #[serde(default, alias = "title")]
    pub track_name: String,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub spotify_id: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub musical_key: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub record_label: Option<String>,
    #[serde(default)]
    pub is_remix: Option<bool>,
    #[serde(default)]
    pub remix_type: Option<String>,
    #[serde(default)]
    pub track_type: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Raw playlist/setlist record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaylistBronze {
    #[serde(default, alias = "playlist_name")]
    pub name: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default, alias = "artist_name")]
    pub dj_artist_name: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default, alias = "event_location")]
    pub venue: Option<String>,
    #[serde(default)]
    pub track_count: Option<i32>,
    #[serde(default)]
    pub metadata: Value,
}

/// Raw playlist membership record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaylistTrackBronze {
    #[serde(default)]
    pub playlist_bronze_id: Option<Uuid>,
    #[serde(default)]
    pub playlist_name: Option<String>,
    #[serde(default)]
    pub track_bronze_id: Option<Uuid>,
    #[serde(default, alias = "track_name")]
    pub track_title: String,
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub metadata: Value,
}

/// Raw track-artist relation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackArtistBronze {
    #[serde(default, alias = "track_name")]
    pub track_title: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub metadata: Value,
}

fn default_role() -> String {
    "primary".to_string()
}

/// Raw adjacency (consecutive playlist positions) record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackAdjacencyBronze {
    #[serde(default)]
    pub track_a_title: String,
    #[serde(default)]
    pub track_b_title: String,
    #[serde(default = "default_distance")]
    pub distance: i32,
    #[serde(default)]
    pub playlist_name: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

fn default_distance() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_id_round_trip() {
        for source in SourceId::ALL {
            assert_eq!(source.as_str().parse::<SourceId>().unwrap(), source);
        }
        assert!("notasite".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_scrape_type_round_trip() {
        for scrape_type in ScrapeType::DEPENDENCY_ORDER {
            assert_eq!(
                scrape_type.as_str().parse::<ScrapeType>().unwrap(),
                scrape_type
            );
        }
    }

    #[test]
    fn test_track_payload_parsing() {
        let raw = json!({
            "artist_name": "FISHER",
            "track_name": "Losing It",
            "bpm": 125.0,
            "record_label": "Catch & Release"
        });
        let payload = BronzePayload::from_raw(ScrapeType::Track, &raw).unwrap();
        match payload {
            BronzePayload::Track(track) => {
                assert_eq!(track.artist_name, "FISHER");
                assert_eq!(track.track_name, "Losing It");
                assert_eq!(track.bpm, Some(125.0));
            }
            other => panic!("expected track payload, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = json!({
            "artist_name": "FISHER",
            "track_name": "Losing It",
            "surprise_field": true
        });
        let result = BronzePayload::from_raw(ScrapeType::Track, &raw);
        assert!(matches!(result, Err(PipelineError::Parse(_))));
    }

    #[test]
    fn test_missing_fields_default() {
        let payload = BronzePayload::from_raw(ScrapeType::Track, &json!({})).unwrap();
        match payload {
            BronzePayload::Track(track) => {
                assert!(track.artist_name.is_empty());
                assert!(track.track_name.is_empty());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_adjacency_default_distance() {
        let raw = json!({"track_a_title": "A", "track_b_title": "B"});
        match BronzePayload::from_raw(ScrapeType::TrackAdjacency, &raw).unwrap() {
            BronzePayload::TrackAdjacency(adj) => assert_eq!(adj.distance, 1),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
