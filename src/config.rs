//! Application configuration.
//!
//! Centralized, environment-driven configuration. Each section has its own
//! `from_env` so binaries can load only what they need; `AppConfig::from_env`
//! aggregates everything for the full pipeline.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::SourceId;

/// Complete pipeline configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub sources: SourceSettings,
    pub apis: ApiCredentials,
    pub enrichment: EnrichmentSettings,
    pub governor: GovernorSettings,
    pub seed_match_mode: SeedMatchMode,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Ok(Self {
            database: DatabaseSettings::from_env(),
            redis: RedisSettings::from_env(),
            sources: SourceSettings::from_env(),
            apis: ApiCredentials::from_env(),
            enrichment: EnrichmentSettings::from_env(),
            governor: GovernorSettings::from_env(),
            seed_match_mode: SeedMatchMode::from_env()?,
        })
    }
}

/// Postgres connection settings (`POSTGRES_*` or a full `DATABASE_URL`).
#[derive(Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseSettings {
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            let host = env_or("POSTGRES_HOST", "localhost");
            let port = env_or("POSTGRES_PORT", "5432");
            let db = env_or("POSTGRES_DB", "musicdb");
            let user = env_or("POSTGRES_USER", "musicdb_user");
            let password = env_or("POSTGRES_PASSWORD", "");
            format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, db)
        });

        Self {
            url,
            min_connections: parse_env("DB_MIN_CONNECTIONS", 2),
            max_connections: parse_env("DB_MAX_CONNECTIONS", 10),
            acquire_timeout: Duration::from_secs(parse_env("DB_ACQUIRE_TIMEOUT_SECS", 10)),
        }
    }
}

/// Redis settings for the work queue and scheduler state.
#[derive(Clone)]
pub struct RedisSettings {
    pub url: String,
}

impl RedisSettings {
    pub fn from_env() -> Self {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| {
            let host = env_or("REDIS_HOST", "localhost");
            let port = env_or("REDIS_PORT", "6379");
            match std::env::var("REDIS_PASSWORD") {
                Ok(password) if !password.is_empty() => {
                    format!("redis://:{}@{}:{}", password, host, port)
                }
                _ => format!("redis://{}:{}", host, port),
            }
        });
        Self { url }
    }
}

/// Per-source scheduling configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub source: SourceId,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub priority: u8,
    pub enabled: bool,
    pub respect_robots: bool,
    pub adaptive_scheduling: bool,
    pub max_concurrent_pages: usize,
    pub retry_on_failure: bool,
}

impl SourceConfig {
    fn defaults(source: SourceId) -> Self {
        // Conservative per-site intervals; the scheduler widens them further
        // under failure or rate-limit pressure.
        let (min_secs, max_secs, priority) = match source {
            SourceId::Tracklists1001 => (7_200, 43_200, 9),
            SourceId::Mixesdb => (10_800, 86_400, 7),
            SourceId::Setlistfm => (14_400, 172_800, 5),
            SourceId::Reddit => (3_600, 21_600, 4),
            _ => (21_600, 172_800, 1),
        };
        Self {
            source,
            min_interval: Duration::from_secs(min_secs),
            max_interval: Duration::from_secs(max_secs),
            priority,
            enabled: source.is_scraping_source(),
            respect_robots: true,
            adaptive_scheduling: true,
            max_concurrent_pages: 2,
            retry_on_failure: true,
        }
    }

    fn from_env(source: SourceId) -> Self {
        let mut config = Self::defaults(source);
        let prefix = source.as_str().to_uppercase().replace('-', "_");
        if let Some(min) = parse_env_opt::<u64>(&format!("{}_MIN_INTERVAL_SECS", prefix)) {
            config.min_interval = Duration::from_secs(min);
        }
        if let Some(max) = parse_env_opt::<u64>(&format!("{}_MAX_INTERVAL_SECS", prefix)) {
            config.max_interval = Duration::from_secs(max);
        }
        if let Some(enabled) = parse_env_opt::<bool>(&format!("{}_ENABLED", prefix)) {
            config.enabled = enabled;
        }
        config
    }
}

/// All per-source configs, keyed by source.
#[derive(Clone)]
pub struct SourceSettings {
    configs: HashMap<SourceId, SourceConfig>,
}

impl SourceSettings {
    pub fn from_env() -> Self {
        let configs = SourceId::ALL
            .into_iter()
            .map(|source| (source, SourceConfig::from_env(source)))
            .collect();
        Self { configs }
    }

    pub fn get(&self, source: SourceId) -> &SourceConfig {
        // Every source is populated in from_env.
        &self.configs[&source]
    }

    pub fn enabled_scraping_sources(&self) -> Vec<&SourceConfig> {
        let mut sources: Vec<&SourceConfig> = self
            .configs
            .values()
            .filter(|c| c.enabled && c.source.is_scraping_source())
            .collect();
        sources.sort_by(|a, b| b.priority.cmp(&a.priority));
        sources
    }
}

/// Credentials for the enrichment APIs. Each service is optional; missing
/// credentials simply disable that waterfall step.
#[derive(Clone, Default)]
pub struct ApiCredentials {
    pub spotify: Option<SpotifyCredentials>,
    pub tidal: Option<TidalCredentials>,
    pub discogs_token: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub getsongbpm_api_key: Option<String>,
    pub musicbrainz_user_agent: String,
}

impl ApiCredentials {
    pub fn from_env() -> Self {
        Self {
            spotify: SpotifyCredentials::from_env(),
            tidal: TidalCredentials::from_env(),
            discogs_token: non_empty_env("DISCOGS_API_TOKEN"),
            lastfm_api_key: non_empty_env("LASTFM_API_KEY"),
            getsongbpm_api_key: non_empty_env("GETSONGBPM_API_KEY"),
            musicbrainz_user_agent: env_or(
                "MUSICBRAINZ_USER_AGENT",
                "music-metadata-pipeline/0.1 (ops@example.com)",
            ),
        }
    }
}

/// Spotify client-credentials pair.
#[derive(Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl SpotifyCredentials {
    pub fn from_env() -> Option<Self> {
        let client_id = non_empty_env("SPOTIFY_CLIENT_ID")?;
        let client_secret = non_empty_env("SPOTIFY_CLIENT_SECRET")?;
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

/// Tidal client-credentials pair.
#[derive(Clone)]
pub struct TidalCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl TidalCredentials {
    pub fn from_env() -> Option<Self> {
        let client_id = non_empty_env("TIDAL_CLIENT_ID")?;
        let client_secret = non_empty_env("TIDAL_CLIENT_SECRET")?;
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

/// Enrichment pipeline knobs: deadlines, worker counts, retry policy.
#[derive(Clone)]
pub struct EnrichmentSettings {
    pub http_timeout: Duration,
    pub per_track_deadline: Duration,
    pub per_batch_deadline: Duration,
    pub worker_count: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl EnrichmentSettings {
    pub fn from_env() -> Self {
        Self {
            http_timeout: Duration::from_secs(parse_env("ENRICHMENT_HTTP_TIMEOUT_SECS", 30)),
            per_track_deadline: Duration::from_secs(parse_env(
                "ENRICHMENT_TRACK_DEADLINE_SECS",
                300,
            )),
            per_batch_deadline: Duration::from_secs(parse_env(
                "ENRICHMENT_BATCH_DEADLINE_SECS",
                600,
            )),
            worker_count: parse_env("ENRICHMENT_WORKERS", 4),
            max_retries: parse_env("ENRICHMENT_MAX_RETRIES", 3),
            retry_base_delay: Duration::from_secs(parse_env("ENRICHMENT_RETRY_BASE_SECS", 30)),
        }
    }
}

/// Robots/rate governor knobs.
#[derive(Clone)]
pub struct GovernorSettings {
    /// Minimum delay between requests to one host when robots.txt is silent.
    pub default_crawl_delay: Duration,
    pub robots_cache_ttl: Duration,
    pub user_agent: String,
}

impl GovernorSettings {
    pub fn from_env() -> Self {
        Self {
            default_crawl_delay: Duration::from_secs(parse_env("GOVERNOR_MIN_DELAY_SECS", 10)),
            robots_cache_ttl: Duration::from_secs(parse_env("ROBOTS_CACHE_TTL_SECS", 3_600)),
            user_agent: env_or(
                "SCRAPER_USER_AGENT",
                "music-metadata-pipeline/0.1 (+https://example.com/bot)",
            ),
        }
    }
}

/// How target-track seeds are matched against silver rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMatchMode {
    Exact,
    Ilike,
}

impl SeedMatchMode {
    pub fn from_env() -> Result<Self, PipelineError> {
        match env_or("SEED_MATCH_MODE", "ilike").to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "ilike" => Ok(Self::Ilike),
            other => Err(PipelineError::Config(format!(
                "SEED_MATCH_MODE must be 'exact' or 'ilike', got '{}'",
                other
            ))),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_defaults() {
        let settings = SourceSettings::from_env();
        let tl = settings.get(SourceId::Tracklists1001);
        assert!(tl.enabled);
        assert_eq!(tl.min_interval, Duration::from_secs(7_200));
        assert_eq!(tl.priority, 9);

        // Enrichment APIs are not scraping sources and start disabled.
        assert!(!settings.get(SourceId::Spotify).enabled);
    }

    #[test]
    fn test_enabled_scraping_sources_sorted_by_priority() {
        let settings = SourceSettings::from_env();
        let enabled = settings.enabled_scraping_sources();
        assert!(!enabled.is_empty());
        for pair in enabled.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }
}
