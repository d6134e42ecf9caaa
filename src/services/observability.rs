//! Observability core: run tracking, quality pillars, graph validation, and
//! anomaly detection.
//!
//! Metrics are buffered in memory and flushed in batches at run end so the
//! hot path never waits on the audit tables.

use std::time::Duration;

use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AnomalyDetection, AnomalySeverity, GraphValidationResult, PipelineMetric, QualityMetric,
    QualityPillar, RunStatus, ScrapingRun, SourceExtractionLog,
};

/// Response-time anomaly thresholds (milliseconds).
const RESPONSE_TIME_WARN_MS: f64 = 5_000.0;
const RESPONSE_TIME_CRITICAL_MS: f64 = 10_000.0;
/// Error-rate anomaly thresholds.
const ERROR_RATE_WARN: f64 = 0.05;
const ERROR_RATE_CRITICAL: f64 = 0.20;
/// Statistical anomaly threshold against the trailing window.
const Z_SCORE_THRESHOLD: f64 = 3.0;

pub struct ObservabilityTracker {
    pool: PgPool,
    metric_buffer: Mutex<Vec<PipelineMetric>>,
    quality_buffer: Mutex<Vec<QualityMetric>>,
    extraction_buffer: Mutex<Vec<SourceExtractionLog>>,
}

impl ObservabilityTracker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            metric_buffer: Mutex::new(Vec::new()),
            quality_buffer: Mutex::new(Vec::new()),
            extraction_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Open a run row and return the tracking handle.
    pub async fn start_run(&self, source: &str) -> Result<ScrapingRun> {
        let run = ScrapingRun::start(source);
        sqlx::query(
            r#"
            INSERT INTO scraping_runs (run_id, source, status, started_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run.run_id)
        .bind(&run.source)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        info!(run_id = %run.run_id, source = source, "run started");
        Ok(run)
    }

    /// Close a run: persist final counters and flush all buffers.
    pub async fn end_run(&self, run: &mut ScrapingRun, status: RunStatus) -> Result<()> {
        run.status = status;
        run.finished_at = Some(Utc::now());
        sqlx::query(
            r#"
            UPDATE scraping_runs
            SET status = $2,
                finished_at = $3,
                playlists_found = $4,
                tracks_added = $5,
                artists_added = $6,
                errors_count = $7
            WHERE run_id = $1
            "#,
        )
        .bind(run.run_id)
        .bind(run.status.as_str())
        .bind(run.finished_at)
        .bind(run.playlists_found)
        .bind(run.tracks_added)
        .bind(run.artists_added)
        .bind(run.errors_count)
        .execute(&self.pool)
        .await?;

        self.flush(run.run_id).await?;
        info!(
            run_id = %run.run_id,
            status = %status,
            tracks = run.tracks_added,
            errors = run.errors_count,
            "run finished"
        );
        Ok(())
    }

    /// Buffer a numeric metric for this run.
    pub async fn record_metric(&self, run_id: Uuid, name: &str, value: f64) {
        self.metric_buffer.lock().await.push(PipelineMetric {
            run_id,
            metric_name: name.to_string(),
            metric_value: value,
            recorded_at: Utc::now(),
        });
    }

    /// Buffer an extraction log entry and run the threshold anomaly checks
    /// that only need this single observation.
    pub async fn record_extraction(&self, log: SourceExtractionLog) -> Result<()> {
        if let Some(anomaly) =
            response_time_anomaly(log.run_id, log.response_time_ms as f64)
        {
            self.store_anomaly(&anomaly).await?;
        }
        self.extraction_buffer.lock().await.push(log);
        Ok(())
    }

    /// Flush every buffer in batches. Buffers may hold entries from several
    /// concurrent runs; everything buffered is written out.
    pub async fn flush(&self, _run_id: Uuid) -> Result<()> {
        let metrics: Vec<PipelineMetric> = {
            let mut buffer = self.metric_buffer.lock().await;
            buffer.drain(..).collect()
        };
        for metric in metrics.iter() {
            sqlx::query(
                r#"
                INSERT INTO pipeline_execution_metrics
                    (run_id, metric_name, metric_value, recorded_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(metric.run_id)
            .bind(&metric.metric_name)
            .bind(metric.metric_value)
            .bind(metric.recorded_at)
            .execute(&self.pool)
            .await?;
        }

        let quality: Vec<QualityMetric> = {
            let mut buffer = self.quality_buffer.lock().await;
            buffer.drain(..).collect()
        };
        for metric in quality {
            sqlx::query(
                r#"
                INSERT INTO data_quality_metrics
                    (run_id, pillar, score, passed, detail, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(metric.run_id)
            .bind(metric.pillar.as_str())
            .bind(metric.score)
            .bind(metric.passed)
            .bind(&metric.detail)
            .bind(metric.recorded_at)
            .execute(&self.pool)
            .await?;
        }

        let extractions: Vec<SourceExtractionLog> = {
            let mut buffer = self.extraction_buffer.lock().await;
            buffer.drain(..).collect()
        };
        for log in extractions {
            sqlx::query(
                r#"
                INSERT INTO source_extraction_log
                    (run_id, source, url, http_status, response_time_ms,
                     records_extracted, error_message, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(log.run_id)
            .bind(&log.source)
            .bind(&log.url)
            .bind(log.http_status)
            .bind(log.response_time_ms)
            .bind(log.records_extracted)
            .bind(&log.error_message)
            .bind(log.recorded_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Compute and buffer the five quality pillars for a run.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_quality_pillars(
        &self,
        run_id: Uuid,
        data_age: Duration,
        actual_volume: i64,
        expected_volume: i64,
        schema_violations: i64,
        total_records: i64,
        unique_artists: i64,
        total_tracks: i64,
        lineage_populated: bool,
    ) {
        let pillars = compute_quality_pillars(
            run_id,
            data_age,
            actual_volume,
            expected_volume,
            schema_violations,
            total_records,
            unique_artists,
            total_tracks,
            lineage_populated,
        );
        self.quality_buffer.lock().await.extend(pillars);
    }

    /// Validate one playlist's adjacency subgraph and persist the result.
    ///
    /// Expected edges = nodes - 1 - consecutive same-artist pairs, the key
    /// invariant the transformer's adjacency join must satisfy.
    pub async fn validate_playlist_graph(
        &self,
        run_id: Uuid,
        playlist_id: Uuid,
    ) -> Result<GraphValidationResult> {
        let rows = sqlx::query(
            r#"
            SELECT pt.track_id, t.artist_name
            FROM silver_playlist_tracks pt
            JOIN silver_tracks t ON t.track_id = pt.track_id
            WHERE pt.playlist_id = $1
            ORDER BY pt.position ASC
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        let tracks: Vec<(Uuid, String)> = rows
            .into_iter()
            .map(|row| {
                Ok::<_, sqlx::Error>((
                    row.try_get::<Uuid, _>("track_id")?,
                    row.try_get::<String, _>("artist_name")?,
                ))
            })
            .collect::<std::result::Result<_, _>>()?;

        let nodes = tracks.len() as i64;
        let artists: Vec<&str> = tracks.iter().map(|(_, a)| a.as_str()).collect();
        let expected_edges = expected_edge_count(&artists);

        let mut actual_edges: i64 = 0;
        for pair in tracks.windows(2) {
            let (a, b) = (pair[0].0, pair[1].0);
            if a == b {
                continue;
            }
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            let exists = sqlx::query(
                r#"
                SELECT 1 AS present FROM silver_track_transitions
                WHERE track_a_id = $1 AND track_b_id = $2
                "#,
            )
            .bind(low)
            .bind(high)
            .fetch_optional(&self.pool)
            .await?;
            if exists.is_some() {
                actual_edges += 1;
            }
        }

        let passed = actual_edges == expected_edges;
        let message = if passed {
            format!("{} nodes, {} edges as expected", nodes, expected_edges)
        } else {
            format!(
                "{} nodes: expected {} edges, found {}",
                nodes, expected_edges, actual_edges
            )
        };
        if !passed {
            warn!(playlist_id = %playlist_id, message = %message, "graph validation failed");
        }

        let result = GraphValidationResult {
            run_id,
            playlist_id,
            expected_nodes: nodes,
            expected_edges,
            actual_edges,
            passed,
            message,
            recorded_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO graph_validation_results
                (run_id, playlist_id, expected_nodes, expected_edges, actual_edges,
                 passed, message, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(result.run_id)
        .bind(result.playlist_id)
        .bind(result.expected_nodes)
        .bind(result.expected_edges)
        .bind(result.actual_edges)
        .bind(result.passed)
        .bind(&result.message)
        .bind(result.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(result)
    }

    /// Threshold + statistical anomaly check for one metric observation.
    /// `history` is the metric's trailing 24 h of values.
    pub async fn check_metric_anomaly(
        &self,
        run_id: Uuid,
        metric: &str,
        value: f64,
        history: &[f64],
    ) -> Result<Option<AnomalyDetection>> {
        let anomaly = match metric {
            "response_time_ms" => response_time_anomaly(run_id, value),
            "error_rate" => error_rate_anomaly(run_id, value),
            _ => statistical_anomaly(run_id, metric, value, history),
        };
        if let Some(ref found) = anomaly {
            self.store_anomaly(found).await?;
        }
        Ok(anomaly)
    }

    async fn store_anomaly(&self, anomaly: &AnomalyDetection) -> Result<()> {
        warn!(
            metric = %anomaly.metric,
            severity = anomaly.severity.as_str(),
            observed = anomaly.observed_value,
            "anomaly detected"
        );
        sqlx::query(
            r#"
            INSERT INTO anomaly_detection
                (run_id, metric, severity, observed_value, expected_low, expected_high,
                 confidence, suggested_action, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(anomaly.run_id)
        .bind(&anomaly.metric)
        .bind(anomaly.severity.as_str())
        .bind(anomaly.observed_value)
        .bind(anomaly.expected_low)
        .bind(anomaly.expected_high)
        .bind(anomaly.confidence)
        .bind(&anomaly.suggested_action)
        .bind(anomaly.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Expected adjacency edges for an ordered list of track artists:
/// `nodes - 1` minus the consecutive pairs sharing an artist.
pub fn expected_edge_count(artists: &[&str]) -> i64 {
    if artists.len() < 2 {
        return 0;
    }
    let same_artist_pairs = artists
        .windows(2)
        .filter(|pair| !pair[0].is_empty() && pair[0] == pair[1])
        .count() as i64;
    artists.len() as i64 - 1 - same_artist_pairs
}

/// Freshness decays linearly to zero over 24 hours.
pub fn freshness_score(age: Duration) -> f64 {
    let day = Duration::from_secs(24 * 3600);
    (1.0 - age.as_secs_f64() / day.as_secs_f64()).clamp(0.0, 1.0)
}

/// Volume ratio clamped into [0.5, 1.5].
pub fn volume_score(actual: i64, expected: i64) -> f64 {
    if expected <= 0 {
        return 1.0;
    }
    (actual as f64 / expected as f64).clamp(0.5, 1.5)
}

/// Schema conformity: 1 - violations/total.
pub fn schema_conformity_score(violations: i64, total: i64) -> f64 {
    if total <= 0 {
        return 1.0;
    }
    (1.0 - violations as f64 / total as f64).clamp(0.0, 1.0)
}

/// Artist diversity scored against the 0.7 ideal.
pub fn distribution_score(unique_artists: i64, total_tracks: i64) -> f64 {
    if total_tracks <= 0 {
        return 1.0;
    }
    let diversity = unique_artists as f64 / total_tracks as f64;
    (1.0 - (diversity - 0.7).abs() / 0.7).clamp(0.0, 1.0)
}

#[allow(clippy::too_many_arguments)]
fn compute_quality_pillars(
    run_id: Uuid,
    data_age: Duration,
    actual_volume: i64,
    expected_volume: i64,
    schema_violations: i64,
    total_records: i64,
    unique_artists: i64,
    total_tracks: i64,
    lineage_populated: bool,
) -> Vec<QualityMetric> {
    let now = Utc::now();
    let schema = schema_conformity_score(schema_violations, total_records);
    let schema_detail = if schema >= 0.95 {
        None
    } else if schema >= 0.80 {
        Some("below pass threshold 0.95".to_string())
    } else {
        Some("below warn threshold 0.80".to_string())
    };

    vec![
        QualityMetric {
            run_id,
            pillar: QualityPillar::Freshness,
            score: freshness_score(data_age),
            passed: freshness_score(data_age) > 0.0,
            detail: None,
            recorded_at: now,
        },
        QualityMetric {
            run_id,
            pillar: QualityPillar::Volume,
            score: volume_score(actual_volume, expected_volume),
            passed: expected_volume <= 0
                || (0.5..=1.5).contains(&(actual_volume as f64 / expected_volume as f64)),
            detail: None,
            recorded_at: now,
        },
        QualityMetric {
            run_id,
            pillar: QualityPillar::SchemaConformity,
            score: schema,
            passed: schema >= 0.95,
            detail: schema_detail,
            recorded_at: now,
        },
        QualityMetric {
            run_id,
            pillar: QualityPillar::Distribution,
            score: distribution_score(unique_artists, total_tracks),
            passed: distribution_score(unique_artists, total_tracks) >= 0.5,
            detail: None,
            recorded_at: now,
        },
        QualityMetric {
            run_id,
            pillar: QualityPillar::Lineage,
            score: if lineage_populated { 1.0 } else { 0.0 },
            passed: lineage_populated,
            detail: None,
            recorded_at: now,
        },
    ]
}

fn response_time_anomaly(run_id: Uuid, value_ms: f64) -> Option<AnomalyDetection> {
    let severity = if value_ms > RESPONSE_TIME_CRITICAL_MS {
        AnomalySeverity::Critical
    } else if value_ms > RESPONSE_TIME_WARN_MS {
        AnomalySeverity::Warning
    } else {
        return None;
    };
    Some(AnomalyDetection {
        run_id,
        metric: "response_time_ms".to_string(),
        severity,
        observed_value: value_ms,
        expected_low: 0.0,
        expected_high: RESPONSE_TIME_WARN_MS,
        confidence: 1.0,
        suggested_action: "check source latency; consider widening the scrape interval"
            .to_string(),
        recorded_at: Utc::now(),
    })
}

fn error_rate_anomaly(run_id: Uuid, rate: f64) -> Option<AnomalyDetection> {
    let severity = if rate > ERROR_RATE_CRITICAL {
        AnomalySeverity::Critical
    } else if rate > ERROR_RATE_WARN {
        AnomalySeverity::Warning
    } else {
        return None;
    };
    Some(AnomalyDetection {
        run_id,
        metric: "error_rate".to_string(),
        severity,
        observed_value: rate,
        expected_low: 0.0,
        expected_high: ERROR_RATE_WARN,
        confidence: 1.0,
        suggested_action: "inspect adapter parse failures and source availability".to_string(),
        recorded_at: Utc::now(),
    })
}

fn statistical_anomaly(
    run_id: Uuid,
    metric: &str,
    value: f64,
    history: &[f64],
) -> Option<AnomalyDetection> {
    if history.len() < 3 {
        return None;
    }
    let mean = history.iter().sum::<f64>() / history.len() as f64;
    let variance =
        history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / history.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return None;
    }
    let z = (value - mean) / std_dev;
    if z.abs() <= Z_SCORE_THRESHOLD {
        return None;
    }
    Some(AnomalyDetection {
        run_id,
        metric: metric.to_string(),
        severity: AnomalySeverity::Warning,
        observed_value: value,
        expected_low: mean - Z_SCORE_THRESHOLD * std_dev,
        expected_high: mean + Z_SCORE_THRESHOLD * std_dev,
        confidence: (z.abs() / (Z_SCORE_THRESHOLD * 2.0)).min(1.0),
        suggested_action: format!("{} deviates from 24h mean; review recent runs", metric),
        recorded_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_edges_with_same_artist_suppression() {
        // T1(X) T2(X) T3(Y) T4(Z): one same-artist pair, expected 2 edges.
        assert_eq!(expected_edge_count(&["x", "x", "y", "z"]), 2);
        assert_eq!(expected_edge_count(&["a", "b", "c"]), 2);
        assert_eq!(expected_edge_count(&["a"]), 0);
        assert_eq!(expected_edge_count(&[]), 0);
        assert_eq!(expected_edge_count(&["a", "a", "a"]), 0);
    }

    #[test]
    fn test_freshness_decay() {
        assert_eq!(freshness_score(Duration::from_secs(0)), 1.0);
        let half = freshness_score(Duration::from_secs(12 * 3600));
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(freshness_score(Duration::from_secs(48 * 3600)), 0.0);
    }

    #[test]
    fn test_volume_clamping() {
        assert_eq!(volume_score(100, 100), 1.0);
        assert_eq!(volume_score(10, 100), 0.5);
        assert_eq!(volume_score(1000, 100), 1.5);
        assert_eq!(volume_score(5, 0), 1.0);
    }

    #[test]
    fn test_schema_conformity() {
        assert_eq!(schema_conformity_score(0, 100), 1.0);
        assert!((schema_conformity_score(10, 100) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_distribution_ideal() {
        assert_eq!(distribution_score(70, 100), 1.0);
        assert!(distribution_score(10, 100) < distribution_score(50, 100));
    }

    #[test]
    fn test_response_time_thresholds() {
        let run = Uuid::new_v4();
        assert!(response_time_anomaly(run, 1_000.0).is_none());
        assert_eq!(
            response_time_anomaly(run, 6_000.0).unwrap().severity,
            AnomalySeverity::Warning
        );
        assert_eq!(
            response_time_anomaly(run, 12_000.0).unwrap().severity,
            AnomalySeverity::Critical
        );
    }

    #[test]
    fn test_error_rate_thresholds() {
        let run = Uuid::new_v4();
        assert!(error_rate_anomaly(run, 0.01).is_none());
        assert_eq!(
            error_rate_anomaly(run, 0.10).unwrap().severity,
            AnomalySeverity::Warning
        );
        assert_eq!(
            error_rate_anomaly(run, 0.30).unwrap().severity,
            AnomalySeverity::Critical
        );
    }

    #[test]
    fn test_statistical_anomaly() {
        let run = Uuid::new_v4();
        let history = [10.0, 11.0, 9.0, 10.0, 10.5, 9.5];
        assert!(statistical_anomaly(run, "tracks_added", 10.2, &history).is_none());
        let spike = statistical_anomaly(run, "tracks_added", 30.0, &history).unwrap();
        assert_eq!(spike.severity, AnomalySeverity::Warning);
        assert!(spike.observed_value > spike.expected_high);
    }
}
