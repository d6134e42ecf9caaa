//! Audit models: run tracking, quality metrics, graph validation, anomalies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final status of a scraping/transformation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row in `scraping_runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingRun {
    pub run_id: Uuid,
    pub source: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub playlists_found: i64,
    pub tracks_added: i64,
    pub artists_added: i64,
    pub errors_count: i64,
}

impl ScrapingRun {
    pub fn start(source: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source: source.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            playlists_found: 0,
            tracks_added: 0,
            artists_added: 0,
            errors_count: 0,
        }
    }
}

/// A buffered numeric metric attached to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetric {
    pub run_id: Uuid,
    pub metric_name: String,
    pub metric_value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Per-source extraction bookkeeping for one fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceExtractionLog {
    pub run_id: Uuid,
    pub source: String,
    pub url: String,
    pub http_status: Option<i32>,
    pub response_time_ms: i64,
    pub records_extracted: i64,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The five data-quality pillars computed per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPillar {
    Freshness,
    Volume,
    SchemaConformity,
    Distribution,
    Lineage,
}

impl QualityPillar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freshness => "freshness",
            Self::Volume => "volume",
            Self::SchemaConformity => "schema_conformity",
            Self::Distribution => "distribution",
            Self::Lineage => "lineage",
        }
    }
}

/// One pillar score for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetric {
    pub run_id: Uuid,
    pub pillar: QualityPillar,
    pub score: f64,
    pub passed: bool,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of validating a playlist's adjacency subgraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphValidationResult {
    pub run_id: Uuid,
    pub playlist_id: Uuid,
    pub expected_nodes: i64,
    pub expected_edges: i64,
    pub actual_edges: i64,
    pub passed: bool,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Severity of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A detected anomaly with enough context to act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub run_id: Uuid,
    pub metric: String,
    pub severity: AnomalySeverity,
    pub observed_value: f64,
    pub expected_low: f64,
    pub expected_high: f64,
    pub confidence: f64,
    pub suggested_action: String,
    pub recorded_at: DateTime<Utc>,
}
