//! Automated scraping scheduler.
//!
//! Decides which (source, target) pair to fetch next, enforces per-source
//! min/max intervals, runs overdue work immediately at startup, and rotates
//! through the persisted target-track seed list. Intervals adapt to the
//! health of each source: a healthy source converges on its minimum
//! interval, a failing or rate-limited one backs off toward its maximum.
//!
//! Scheduler state (last-run timestamps, rotation cursor) lives in Redis so
//! restarts neither re-run fresh sources nor starve seeds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{SourceConfig, SourceSettings};
use crate::error::{PipelineError, Result};
use crate::models::{RunStatus, ScrapingRun, SourceExtractionLog, SourceId};
use crate::services::adapters::{AdapterRegistry, TargetKind, TargetRef};
use crate::services::bronze_store::BronzeStore;
use crate::services::governor::{HostStats, RateGovernor, RequestOutcome};
use crate::services::observability::ObservabilityTracker;

/// A persisted search seed the scheduler rotates through.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTrack {
    pub artist: String,
    pub title: String,
    pub priority: i32,
}

/// How many seeds one run consumes per source.
const SEED_BATCH_SIZE: usize = 10;
/// Cap on detail pages fetched per index page.
const MAX_DETAIL_PAGES: usize = 20;

pub struct Scheduler {
    sources: SourceSettings,
    governor: Arc<RateGovernor>,
    adapters: Arc<AdapterRegistry>,
    bronze: Arc<BronzeStore>,
    observability: Arc<ObservabilityTracker>,
    redis: deadpool_redis::Pool,
    running: Mutex<HashSet<SourceId>>,
}

impl Scheduler {
    pub fn new(
        sources: SourceSettings,
        governor: Arc<RateGovernor>,
        adapters: Arc<AdapterRegistry>,
        bronze: Arc<BronzeStore>,
        observability: Arc<ObservabilityTracker>,
        redis: deadpool_redis::Pool,
    ) -> Self {
        Self {
            sources,
            governor,
            adapters,
            bronze,
            observability,
            redis,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Startup procedure: run every overdue source in parallel, then loop
    /// each enabled source on its adaptive interval.
    pub async fn run_forever(self: Arc<Self>) -> Result<()> {
        let overdue = self.overdue_sources().await?;
        if !overdue.is_empty() {
            info!(count = overdue.len(), "running overdue sources at startup");
            let mut handles = Vec::new();
            for source in overdue {
                let scheduler = self.clone();
                handles.push(tokio::spawn(async move {
                    if let Err(e) = scheduler.run_source(source).await {
                        error!(source = %source, error = %e, "overdue run failed");
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        let mut loops = Vec::new();
        for config in self.sources.enabled_scraping_sources() {
            let source = config.source;
            let scheduler = self.clone();
            loops.push(tokio::spawn(async move {
                scheduler.source_loop(source).await;
            }));
        }
        for task in loops {
            let _ = task.await;
        }
        Ok(())
    }

    async fn source_loop(self: Arc<Self>, source: SourceId) {
        loop {
            let interval = match self.next_interval(source).await {
                Ok(interval) => interval,
                Err(e) => {
                    warn!(source = %source, error = %e, "interval calculation failed");
                    self.sources.get(source).min_interval
                }
            };
            tokio::time::sleep(interval).await;
            if let Err(e) = self.run_source(source).await {
                if e.is_infrastructure() {
                    error!(source = %source, error = %e, "aborting source loop");
                    return;
                }
                warn!(source = %source, error = %e, "scrape run failed");
            }
        }
    }

    /// Sources whose last completed run is older than their minimum interval.
    pub async fn overdue_sources(&self) -> Result<Vec<SourceId>> {
        let mut overdue = Vec::new();
        for config in self.sources.enabled_scraping_sources() {
            let last_run = self.last_run_at(config.source).await?;
            let due = match last_run {
                None => true,
                Some(ts) => {
                    let elapsed = Utc::now().timestamp() - ts;
                    elapsed >= config.min_interval.as_secs() as i64
                }
            };
            if due {
                overdue.push(config.source);
            }
        }
        Ok(overdue)
    }

    /// Execute one scrape run for a source. At most one run per source is
    /// active at a time; a second call while running is a no-op error.
    pub async fn run_source(&self, source: SourceId) -> Result<ScrapingRun> {
        {
            let mut running = self.running.lock().await;
            if !running.insert(source) {
                return Err(PipelineError::Validation(format!(
                    "run already in progress for {}",
                    source
                )));
            }
        }
        let result = self.run_source_inner(source).await;
        self.running.lock().await.remove(&source);
        result
    }

    async fn run_source_inner(&self, source: SourceId) -> Result<ScrapingRun> {
        let adapter = self.adapters.get(source).ok_or_else(|| {
            PipelineError::Config(format!("no adapter registered for {}", source))
        })?;
        let mut run = self.observability.start_run(source.as_str()).await?;

        let seeds = self.next_track_batch(source, SEED_BATCH_SIZE).await?;
        let mut search_targets = Vec::new();
        for seed in &seeds {
            for url in search_urls(source, seed) {
                search_targets.push(TargetRef {
                    url,
                    priority: adapter.priority_hint(),
                    kind: TargetKind::Index,
                });
            }
        }

        for target in search_targets {
            match self.fetch_governed(&run, source, &target).await {
                Ok(response) => {
                    let detail_targets = match adapter.parse_index(&response) {
                        Ok(targets) => targets,
                        Err(e) => {
                            warn!(url = %target.url, error = %e, "index parse failed");
                            run.errors_count += 1;
                            continue;
                        }
                    };
                    let retry_on_failure = self.sources.get(source).retry_on_failure;
                    for detail in detail_targets.into_iter().take(MAX_DETAIL_PAGES) {
                        let mut result = self.fetch_governed(&run, source, &detail).await;
                        if retry_on_failure
                            && matches!(&result, Err(e) if e.is_retriable() && !e.is_infrastructure())
                        {
                            result = self.fetch_governed(&run, source, &detail).await;
                        }
                        match result {
                            Ok(detail_response) => {
                                match adapter.parse_detail(&detail_response) {
                                    Ok(records) => {
                                        self.persist_records(&mut run, source, records).await?;
                                    }
                                    Err(e) => {
                                        warn!(url = %detail.url, error = %e, "detail parse failed");
                                        run.errors_count += 1;
                                    }
                                }
                            }
                            Err(e) if e.is_infrastructure() => return Err(e),
                            Err(e) => {
                                warn!(url = %detail.url, error = %e, "detail fetch failed");
                                run.errors_count += 1;
                            }
                        }
                    }
                }
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    warn!(url = %target.url, error = %e, "index fetch failed");
                    run.errors_count += 1;
                }
            }
        }

        self.set_last_run(source).await?;
        let status = if run.errors_count > 0 && run.tracks_added == 0 && run.playlists_found == 0
        {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.observability.end_run(&mut run, status).await?;
        Ok(run)
    }

    async fn fetch_governed(
        &self,
        run: &ScrapingRun,
        source: SourceId,
        target: &TargetRef,
    ) -> Result<crate::services::adapters::RawResponse> {
        let adapter = self.adapters.get(source).ok_or_else(|| {
            PipelineError::Config(format!("no adapter registered for {}", source))
        })?;
        let config = self.sources.get(source);

        let host = if config.respect_robots {
            self.governor.acquire(&target.url).await?
        } else {
            RateGovernor::host_of(&target.url)?
        };

        let started = std::time::Instant::now();
        let result = adapter.fetch(target).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(response) if response.status == 429 => RequestOutcome::RateLimited,
            Ok(response) if response.status < 400 => RequestOutcome::Success,
            Ok(_) => RequestOutcome::Failure,
            Err(PipelineError::RateLimited { .. }) => RequestOutcome::RateLimited,
            Err(_) => RequestOutcome::Failure,
        };
        if config.respect_robots {
            self.governor
                .mark_complete(&host, outcome, Some(elapsed))
                .await;
        }

        let log = SourceExtractionLog {
            run_id: run.run_id,
            source: source.as_str().to_string(),
            url: target.url.clone(),
            http_status: result.as_ref().ok().map(|r| r.status as i32),
            response_time_ms: elapsed.as_millis() as i64,
            records_extracted: 0,
            error_message: result.as_ref().err().map(|e| e.to_string()),
            recorded_at: Utc::now(),
        };
        self.observability.record_extraction(log).await?;

        match result {
            Ok(response) if response.status == 429 => {
                Err(PipelineError::RateLimited { retry_after: None })
            }
            Ok(response) if response.status >= 400 => Err(PipelineError::from_status(
                response.status,
                &target.url,
                None,
            )),
            other => other,
        }
    }

    async fn persist_records(
        &self,
        run: &mut ScrapingRun,
        source: SourceId,
        records: Vec<crate::services::adapters::RawScrapeRecord>,
    ) -> Result<()> {
        use crate::models::ScrapeType;
        for record in records {
            let inserted = self
                .bronze
                .insert(source, record.scrape_type, &record.raw_data)
                .await?;
            if inserted.is_some() {
                match record.scrape_type {
                    ScrapeType::Playlist => run.playlists_found += 1,
                    ScrapeType::Track => run.tracks_added += 1,
                    ScrapeType::Artist => run.artists_added += 1,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Adaptive interval for the next run of a source.
    pub async fn next_interval(&self, source: SourceId) -> Result<Duration> {
        let config = self.sources.get(source);
        if !config.adaptive_scheduling {
            return Ok(config.min_interval);
        }
        let adapter = self.adapters.get(source);
        let hosts = adapter
            .map(|a| a.allowed_domains())
            .unwrap_or_default();
        let stats = self.governor.aggregate_stats(&hosts).await;
        let robots_delay = match hosts.first() {
            Some(host) => self.governor.crawl_delay(host).await,
            None => Duration::from_secs(10),
        };
        // One index page per seed plus the detail pages it fans out into.
        let expected_requests =
            (SEED_BATCH_SIZE * (1 + config.max_concurrent_pages * 2)) as u32;
        Ok(adaptive_interval(
            config,
            &stats,
            robots_delay,
            expected_requests,
        ))
    }

    /// Next batch of target tracks for a source, advancing the persistent
    /// rotation cursor (wrapping) so restarts do not starve seeds.
    pub async fn next_track_batch(
        &self,
        source: SourceId,
        batch_size: usize,
    ) -> Result<Vec<TargetTrack>> {
        let seeds = self.load_target_tracks().await?;
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let cursor_key = format!("scheduler:cursor:{}", source);
        let mut conn = self.redis.get().await?;
        let cursor: u64 = conn.get(&cursor_key).await.unwrap_or(0);

        let start = (cursor as usize) % seeds.len();
        let batch: Vec<TargetTrack> = seeds
            .iter()
            .cycle()
            .skip(start)
            .take(batch_size.min(seeds.len()))
            .cloned()
            .collect();

        let next_cursor = (start + batch.len()) % seeds.len();
        let _: () = conn.set(&cursor_key, next_cursor as u64).await?;
        Ok(batch)
    }

    /// Seed list, priority-weighted.
    pub async fn load_target_tracks(&self) -> Result<Vec<TargetTrack>> {
        use sqlx::Row;
        let rows = sqlx::query(
            r#"
            SELECT artist, title, priority
            FROM target_tracks
            WHERE enabled = TRUE
            ORDER BY priority DESC, artist ASC, title ASC
            "#,
        )
        .fetch_all(self.bronze.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TargetTrack {
                    artist: row.try_get("artist")?,
                    title: row.try_get("title")?,
                    priority: row.try_get("priority")?,
                })
            })
            .collect()
    }

    async fn last_run_at(&self, source: SourceId) -> Result<Option<i64>> {
        let mut conn = self.redis.get().await?;
        let value: Option<i64> = conn
            .get(format!("scheduler:last_run:{}", source))
            .await
            .unwrap_or(None);
        Ok(value)
    }

    async fn set_last_run(&self, source: SourceId) -> Result<()> {
        let mut conn = self.redis.get().await?;
        let _: () = conn
            .set(
                format!("scheduler:last_run:{}", source),
                Utc::now().timestamp(),
            )
            .await?;
        Ok(())
    }
}

/// Adaptive interval calculation.
///
/// Success-rate tiers map onto multiples of the minimum interval, a
/// rate-limit multiplier widens it further, and the result never undercuts
/// robots-delay x expected requests. Clamped into [min, max].
pub fn adaptive_interval(
    config: &SourceConfig,
    stats: &HostStats,
    robots_delay: Duration,
    expected_requests: u32,
) -> Duration {
    let min = config.min_interval;
    let max = config.max_interval;

    let base = if stats.total_requests == 0 {
        // No history yet: start in the middle.
        (min + max) / 2
    } else {
        let rate = stats.success_rate();
        if rate >= 0.95 {
            min
        } else if rate >= 0.80 {
            min.mul_f64(1.5)
        } else if rate >= 0.50 {
            min * 2
        } else {
            max.min(min * 4)
        }
    };

    let multiplier = 1.5f64
        .powi(stats.rate_limit_hits.min(i32::MAX as u64) as i32)
        .min(4.0);
    let mut interval = base.mul_f64(multiplier);

    let robots_floor = robots_delay * expected_requests;
    if interval < robots_floor {
        interval = robots_floor;
    }

    interval.clamp(min, max)
}

/// Search URLs a seed generates for a given source.
pub fn search_urls(source: SourceId, track: &TargetTrack) -> Vec<String> {
    let query = format!("{} {}", track.artist, track.title);
    let encoded = urlencoding::encode(&query);
    match source {
        SourceId::Tracklists1001 => vec![format!(
            "https://www.1001tracklists.com/search/result.php?main_search={}",
            encoded
        )],
        SourceId::Mixesdb => vec![format!(
            "https://www.mixesdb.com/db/index.php?title=Special%3ASearch&search={}",
            encoded
        )],
        SourceId::Setlistfm => vec![format!(
            "https://www.setlist.fm/search?query={}",
            encoded
        )],
        SourceId::Reddit => vec![format!(
            "https://www.reddit.com/search.json?q={}&sort=new&limit=25",
            encoded
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;

    fn config_with(min_secs: u64, max_secs: u64) -> SourceConfig {
        let settings = crate::config::SourceSettings::from_env();
        let mut config = settings.get(SourceId::Tracklists1001).clone();
        config.min_interval = Duration::from_secs(min_secs);
        config.max_interval = Duration::from_secs(max_secs);
        config
    }

    fn stats(total: u64, success: u64, hits: u64) -> HostStats {
        HostStats {
            total_requests: total,
            successful_requests: success,
            rate_limit_hits: hits,
            last_response_time: None,
        }
    }

    #[test]
    fn test_interval_healthy_source_uses_minimum() {
        let config = config_with(3_600, 86_400);
        let interval =
            adaptive_interval(&config, &stats(100, 100, 0), Duration::from_secs(1), 20);
        assert_eq!(interval, Duration::from_secs(3_600));
    }

    #[test]
    fn test_interval_tiers() {
        let config = config_with(3_600, 86_400);
        let d1 = adaptive_interval(&config, &stats(100, 90, 0), Duration::from_secs(1), 20);
        assert_eq!(d1, Duration::from_secs(5_400)); // min * 1.5
        let d2 = adaptive_interval(&config, &stats(100, 60, 0), Duration::from_secs(1), 20);
        assert_eq!(d2, Duration::from_secs(7_200)); // min * 2
        let d3 = adaptive_interval(&config, &stats(100, 10, 0), Duration::from_secs(1), 20);
        assert_eq!(d3, Duration::from_secs(14_400)); // min * 4
    }

    #[test]
    fn test_interval_rate_limit_multiplier_caps_at_4x() {
        let config = config_with(3_600, 86_400);
        let one_hit = adaptive_interval(&config, &stats(100, 100, 1), Duration::from_secs(1), 20);
        assert_eq!(one_hit, Duration::from_secs(5_400)); // min * 1.5
        let many_hits =
            adaptive_interval(&config, &stats(100, 100, 10), Duration::from_secs(1), 20);
        assert_eq!(many_hits, Duration::from_secs(14_400)); // capped at min * 4
    }

    #[test]
    fn test_interval_robots_floor() {
        let config = config_with(60, 86_400);
        // 30s robots delay * 20 requests = 600s floor.
        let interval =
            adaptive_interval(&config, &stats(100, 100, 0), Duration::from_secs(30), 20);
        assert_eq!(interval, Duration::from_secs(600));
    }

    #[test]
    fn test_interval_clamped_to_max() {
        let config = config_with(3_600, 7_000);
        let interval = adaptive_interval(&config, &stats(100, 0, 10), Duration::from_secs(1), 20);
        assert_eq!(interval, Duration::from_secs(7_000));
    }

    #[test]
    fn test_interval_no_history_uses_midpoint() {
        let config = config_with(1_000, 3_000);
        let interval = adaptive_interval(&config, &stats(0, 0, 0), Duration::from_secs(1), 1);
        assert_eq!(interval, Duration::from_secs(2_000));
    }

    #[test]
    fn test_search_urls_encoded() {
        let seed = TargetTrack {
            artist: "FISHER & Chris Lake".to_string(),
            title: "Losing It".to_string(),
            priority: 5,
        };
        let urls = search_urls(SourceId::Tracklists1001, &seed);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains("1001tracklists.com"));
        assert!(urls[0].contains("FISHER%20%26%20Chris%20Lake%20Losing%20It"));

        assert!(search_urls(SourceId::Spotify, &seed).is_empty());
    }
}
