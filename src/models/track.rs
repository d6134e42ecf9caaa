//! Silver-layer track models and enrichment bookkeeping.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PipelineError;

/// Valid BPM range for silver tracks; values outside are clamped on write.
pub const BPM_MIN: f64 = 60.0;
pub const BPM_MAX: f64 = 200.0;

/// Clamp a BPM value into the accepted range.
pub fn clamp_bpm(bpm: f64) -> f64 {
    bpm.clamp(BPM_MIN, BPM_MAX)
}

/// A validated, deduplicated silver track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: Uuid,
    pub title: String,
    pub normalized_title: String,
    /// Denormalized primary artist credit.
    pub artist_name: String,
    pub duration_ms: Option<i64>,
    pub bpm: Option<f64>,
    /// Traditional key name, e.g. "C# minor".
    pub key: Option<String>,
    /// Camelot code derived from `key`; present iff `key` parses.
    pub camelot_key: Option<String>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub valence: Option<f64>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub isrc: Option<String>,
    pub spotify_id: Option<String>,
    pub tidal_id: Option<String>,
    pub musicbrainz_id: Option<String>,
    pub discogs_id: Option<String>,
    pub beatport_id: Option<String>,
    pub is_remix: bool,
    pub is_mashup: bool,
    pub is_live: bool,
    pub is_cover: bool,
    pub data_quality_score: f64,
    pub metadata: Value,
}

impl Track {
    pub fn new(title: &str, normalized_title: &str, artist_name: &str) -> Self {
        Self {
            track_id: Uuid::new_v4(),
            title: title.to_string(),
            normalized_title: normalized_title.to_string(),
            artist_name: artist_name.to_string(),
            duration_ms: None,
            bpm: None,
            key: None,
            camelot_key: None,
            energy: None,
            danceability: None,
            valence: None,
            genre: None,
            label: None,
            isrc: None,
            spotify_id: None,
            tidal_id: None,
            musicbrainz_id: None,
            discogs_id: None,
            beatport_id: None,
            is_remix: false,
            is_mashup: false,
            is_live: false,
            is_cover: false,
            data_quality_score: 0.0,
            metadata: Value::Null,
        }
    }
}

/// Validation status assigned by the transformer from the quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Warning,
    NeedsReview,
}

impl ValidationStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::Valid
        } else if score >= 0.4 {
            Self::Warning
        } else {
            Self::NeedsReview
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Warning => "warning",
            Self::NeedsReview => "needs_review",
        }
    }
}

/// Lifecycle state of a track's enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    Pending,
    Completed,
    Partial,
    Failed,
}

impl EnrichmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EnrichmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrichmentState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown enrichment state: {}",
                other
            ))),
        }
    }
}

/// Bucketed confidence signal over the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    Unreliable,
}

impl ConfidenceTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            Self::High
        } else if score >= 0.70 {
            Self::Medium
        } else if score >= 0.50 {
            Self::Low
        } else {
            Self::Unreliable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unreliable => "unreliable",
        }
    }
}

/// Per-track enrichment audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentStatus {
    pub track_id: Uuid,
    pub status: EnrichmentState,
    pub sources_enriched: Vec<String>,
    pub retry_count: i32,
    pub last_attempt: DateTime<Utc>,
    pub is_retriable: bool,
    pub error_message: Option<String>,
    pub confidence_score: f64,
    pub confidence_tier: ConfidenceTier,
}

impl EnrichmentStatus {
    pub fn pending(track_id: Uuid) -> Self {
        Self {
            track_id,
            status: EnrichmentState::Pending,
            sources_enriched: Vec::new(),
            retry_count: 0,
            last_attempt: Utc::now(),
            is_retriable: true,
            error_message: None,
            confidence_score: 0.0,
            confidence_tier: ConfidenceTier::Unreliable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_clamping() {
        assert_eq!(clamp_bpm(59.9), 60.0);
        assert_eq!(clamp_bpm(200.1), 200.0);
        assert_eq!(clamp_bpm(128.0), 128.0);
    }

    #[test]
    fn test_validation_status_thresholds() {
        assert_eq!(ValidationStatus::from_score(0.7), ValidationStatus::Valid);
        assert_eq!(ValidationStatus::from_score(0.69), ValidationStatus::Warning);
        assert_eq!(ValidationStatus::from_score(0.4), ValidationStatus::Warning);
        assert_eq!(
            ValidationStatus::from_score(0.39),
            ValidationStatus::NeedsReview
        );
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceTier::from_score(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.85), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.75), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.55), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(0.1), ConfidenceTier::Unreliable);
    }
}
