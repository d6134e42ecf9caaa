pub mod adapters;
pub mod artist_resolver;
pub mod bronze_store;
pub mod circuit_breaker;
pub mod enrichment;
pub mod governor;
pub mod observability;
pub mod scheduler;
pub mod transformer;
pub mod work_queue;

pub use adapters::{AdapterRegistry, RawResponse, RawScrapeRecord, SourceAdapter, TargetRef};
pub use artist_resolver::{
    ArtistResolution, CommunityLookup, MultiTierArtistResolver, ResolutionSource,
};
pub use bronze_store::BronzeStore;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use enrichment::{EnrichmentOutcome, EnrichmentPipeline, EnrichmentServices};
pub use governor::{RateGovernor, RequestOutcome, UrlQueue};
pub use observability::ObservabilityTracker;
pub use scheduler::{Scheduler, TargetTrack};
pub use transformer::{TransformStats, Transformer};
pub use work_queue::{Dispatcher, QueuedTask, TaskKind, TaskPriority, WorkQueue};
