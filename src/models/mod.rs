pub mod artist;
pub mod bronze;
pub mod observability;
pub mod playlist;
pub mod track;

pub use artist::{Artist, ArtistRole};
pub use bronze::{
    ArtistBronze, BronzePayload, PlaylistBronze, PlaylistTrackBronze, RawScrape, ScrapeType,
    SourceId, TrackAdjacencyBronze, TrackArtistBronze, TrackBronze,
};
pub use observability::{
    AnomalyDetection, AnomalySeverity, GraphValidationResult, PipelineMetric, QualityMetric,
    QualityPillar, RunStatus, ScrapingRun, SourceExtractionLog,
};
pub use playlist::{Playlist, PlaylistTrack, TrackTransition};
pub use track::{
    clamp_bpm, ConfidenceTier, EnrichmentState, EnrichmentStatus, Track, ValidationStatus,
};
