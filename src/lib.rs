//! Music metadata ingestion and enrichment pipeline.
//!
//! Crawls third-party tracklist/setlist/streaming sources into an
//! append-only bronze layer, transforms bronze into a validated silver graph
//! of tracks, artists, playlists, and transitions, and enriches silver
//! tracks through a multi-source waterfall with circuit breakers and
//! confidence scoring.

use std::sync::Arc;

use sqlx::PgPool;

pub mod camelot;
pub mod config;
pub mod database;
pub mod error;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod services;

pub use config::AppConfig;
pub use error::{PipelineError, Result};

use services::{
    AdapterRegistry, BronzeStore, CircuitBreakerRegistry, Dispatcher, EnrichmentPipeline,
    EnrichmentServices, MultiTierArtistResolver, ObservabilityTracker, RateGovernor, Scheduler,
    WorkQueue,
};

/// All long-lived handles, constructed once at startup and shared into the
/// components. Shared mutable state (robots cache, circuit breakers, the
/// artist-label map) lives behind these handles; there are no ambient
/// globals.
pub struct PipelineContext {
    pub config: AppConfig,
    pub db_pool: PgPool,
    pub redis_pool: deadpool_redis::Pool,
    pub metrics: prometheus::Registry,
    pub governor: Arc<RateGovernor>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub adapters: Arc<AdapterRegistry>,
    pub bronze: Arc<BronzeStore>,
    pub observability: Arc<ObservabilityTracker>,
    pub resolver: Arc<MultiTierArtistResolver>,
    pub enrichment: Arc<EnrichmentPipeline>,
    pub queue: Arc<WorkQueue>,
    pub dispatcher: Arc<Dispatcher>,
}

impl PipelineContext {
    /// Wire the full pipeline from configuration. Site adapters are
    /// registered separately by the embedding binary.
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        Self::initialize_with_adapters(config, AdapterRegistry::new()).await
    }

    pub async fn initialize_with_adapters(
        config: AppConfig,
        adapters: AdapterRegistry,
    ) -> Result<Self> {
        let db_pool = database::create_pool(&config.database).await?;
        let redis_pool = database::create_redis_pool(&config.redis)?;
        let metrics = prometheus::Registry::new();

        let governor = Arc::new(RateGovernor::new(config.governor.clone())?);
        let breakers =
            Arc::new(CircuitBreakerRegistry::new().with_metrics(&metrics)?);
        let adapters = Arc::new(adapters);
        let bronze = Arc::new(BronzeStore::new(db_pool.clone()));
        let observability = Arc::new(ObservabilityTracker::new(db_pool.clone()));

        let enrichment_services =
            EnrichmentServices::from_credentials(&config.apis, &config.enrichment)?;
        let resolver = {
            let mut resolver = MultiTierArtistResolver::new(db_pool.clone());
            if let Some(discogs) = enrichment_services.discogs.clone() {
                resolver = resolver.with_discogs(discogs);
            }
            Arc::new(resolver)
        };
        let enrichment = Arc::new(
            EnrichmentPipeline::new(db_pool.clone(), enrichment_services, breakers.clone())
                .with_resolver(resolver.clone()),
        );

        let queue = Arc::new(WorkQueue::new(redis_pool.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            enrichment.clone(),
            resolver.clone(),
            config.enrichment.clone(),
        ));

        Ok(Self {
            config,
            db_pool,
            redis_pool,
            metrics,
            governor,
            breakers,
            adapters,
            bronze,
            observability,
            resolver,
            enrichment,
            queue,
            dispatcher,
        })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            self.config.sources.clone(),
            self.governor.clone(),
            self.adapters.clone(),
            self.bronze.clone(),
            self.observability.clone(),
            self.redis_pool.clone(),
        ))
    }
}
