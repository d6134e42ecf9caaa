//! Multi-source enrichment waterfall.
//!
//! For one silver track, runs the ordered cascade of external lookups. Every
//! step is independent: a failing service is recorded and the waterfall
//! continues. Fields are only ever filled when absent; nothing a step
//! returns overwrites data we already trust. The final confidence score
//! reflects the best attribution method that actually contributed, plus a
//! contextual boost when the surrounding setlists corroborate it.

pub mod audio_features;
pub mod confidence;
pub mod discogs;
pub mod lastfm;
pub mod musicbrainz;
pub mod spotify;
pub mod tidal;

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::camelot::CamelotKey;
use crate::config::{ApiCredentials, EnrichmentSettings};
use crate::error::{PipelineError, Result};
use crate::matching::title_similarity;
use crate::models::{clamp_bpm, ConfidenceTier, EnrichmentState};
use crate::normalize::normalize_title_only;
use crate::services::artist_resolver::{is_unknown_artist, MultiTierArtistResolver};
use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::transformer::upsert_artist;

use self::audio_features::{AcousticBrainzClient, GetSongBpmClient};
use self::confidence::{score_with_context, AttributionMethod};
use self::discogs::DiscogsClient;
use self::lastfm::LastfmClient;
use self::musicbrainz::MusicBrainzClient;
use self::spotify::SpotifyClient;
use self::tidal::TidalClient;

/// Normalized view of what one external service returned for a track.
#[derive(Debug, Clone, Default)]
pub struct ExternalTrackData {
    pub service: &'static str,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub isrc: Option<String>,
    pub duration_ms: Option<i64>,
    pub bpm: Option<f64>,
    pub key_pitch_class: Option<i32>,
    pub mode: Option<i32>,
    pub key_name: Option<String>,
    pub energy: Option<f64>,
    pub danceability: Option<f64>,
    pub valence: Option<f64>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub tags: Vec<String>,
    pub popularity: Option<i64>,
    pub release_year: Option<i32>,
}

impl ExternalTrackData {
    pub fn empty(service: &'static str) -> Self {
        Self {
            service,
            ..Self::default()
        }
    }
}

/// The optional clients, bundled. Missing credentials disable a service.
pub struct EnrichmentServices {
    pub spotify: Option<SpotifyClient>,
    pub tidal: Option<TidalClient>,
    pub musicbrainz: MusicBrainzClient,
    pub discogs: Option<Arc<DiscogsClient>>,
    pub lastfm: Option<LastfmClient>,
    pub acousticbrainz: AcousticBrainzClient,
    pub getsongbpm: Option<GetSongBpmClient>,
}

impl EnrichmentServices {
    pub fn from_credentials(apis: &ApiCredentials, settings: &EnrichmentSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(apis.musicbrainz_user_agent.clone())
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            spotify: apis
                .spotify
                .clone()
                .map(|creds| SpotifyClient::new(creds, client.clone())),
            tidal: apis
                .tidal
                .clone()
                .map(|creds| TidalClient::new(creds, client.clone())),
            musicbrainz: MusicBrainzClient::new(client.clone()),
            discogs: apis
                .discogs_token
                .clone()
                .map(|token| Arc::new(DiscogsClient::new(token, client.clone()))),
            lastfm: apis
                .lastfm_api_key
                .clone()
                .map(|key| LastfmClient::new(key, client.clone())),
            acousticbrainz: AcousticBrainzClient::new(client.clone()),
            getsongbpm: apis
                .getsongbpm_api_key
                .clone()
                .map(|key| GetSongBpmClient::new(key, client)),
        })
    }
}

/// Result of one enrichment attempt, mirrored into `enrichment_status`.
#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub track_id: Uuid,
    pub status: EnrichmentState,
    pub sources_enriched: Vec<String>,
    pub confidence_score: f64,
    pub confidence_tier: ConfidenceTier,
    pub is_retriable: bool,
    pub error_message: Option<String>,
}

/// Silver-track fields the waterfall reads and may fill.
#[derive(Debug, Clone)]
struct TrackRow {
    track_id: Uuid,
    title: String,
    normalized_title: String,
    artist_name: String,
    duration_ms: Option<i64>,
    bpm: Option<f64>,
    key: Option<String>,
    camelot_key: Option<String>,
    energy: Option<f64>,
    danceability: Option<f64>,
    valence: Option<f64>,
    genre: Option<String>,
    label: Option<String>,
    isrc: Option<String>,
    spotify_id: Option<String>,
    tidal_id: Option<String>,
    musicbrainz_id: Option<String>,
    discogs_id: Option<String>,
}

/// Mutable accumulator threaded through the waterfall.
struct Waterfall {
    row: TrackRow,
    sources_enriched: Vec<String>,
    best_method: Option<AttributionMethod>,
    popularity: Option<i64>,
    tags: Vec<String>,
    failures: Vec<(String, PipelineError)>,
}

impl Waterfall {
    fn record_failure(&mut self, service: &str, error: PipelineError) {
        debug!(service = service, error = %error, "enrichment step failed");
        self.failures.push((service.to_string(), error));
    }

    fn mark_enriched(&mut self, service: &str) {
        if !self.sources_enriched.iter().any(|s| s == service) {
            self.sources_enriched.push(service.to_string());
        }
    }

    fn consider_method(&mut self, method: AttributionMethod) {
        let candidate = confidence::score_method(method);
        let current = self
            .best_method
            .map(confidence::score_method)
            .unwrap_or(0.0);
        if candidate > current {
            self.best_method = Some(method);
        }
    }

    /// Merge service data into the row, filling absent fields only.
    fn merge(&mut self, data: &ExternalTrackData) {
        let row = &mut self.row;
        match data.service {
            "spotify" => fill(&mut row.spotify_id, data.external_id.clone()),
            "tidal" => fill(&mut row.tidal_id, data.external_id.clone()),
            "musicbrainz" => fill(&mut row.musicbrainz_id, data.external_id.clone()),
            "discogs" => fill(&mut row.discogs_id, data.external_id.clone()),
            _ => {}
        }
        fill(&mut row.isrc, data.isrc.clone());
        fill(&mut row.duration_ms, data.duration_ms);
        if row.bpm.is_none() {
            row.bpm = data.bpm.map(clamp_bpm);
        }
        if row.key.is_none() {
            if let Some(name) = &data.key_name {
                row.key = Some(name.clone());
            } else if let (Some(pitch), Some(mode)) = (data.key_pitch_class, data.mode) {
                row.key = CamelotKey::from_pitch_class(pitch, mode)
                    .map(|camelot| camelot.to_traditional());
            }
        }
        fill(&mut row.energy, data.energy);
        fill(&mut row.danceability, data.danceability);
        fill(&mut row.valence, data.valence);
        fill(&mut row.genre, data.genre.clone());
        fill(&mut row.label, data.label.clone());
        if self.popularity.is_none() {
            self.popularity = data.popularity;
        }
        for tag in &data.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
        self.mark_enriched(data.service);
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

pub struct EnrichmentPipeline {
    pool: PgPool,
    services: EnrichmentServices,
    breakers: Arc<CircuitBreakerRegistry>,
    resolver: Option<Arc<MultiTierArtistResolver>>,
}

impl EnrichmentPipeline {
    pub fn new(
        pool: PgPool,
        services: EnrichmentServices,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            pool,
            services,
            breakers,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<MultiTierArtistResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Run the full waterfall for one track and persist the result.
    pub async fn enrich_track(&self, track_id: Uuid) -> Result<EnrichmentOutcome> {
        let row = self.load_track(track_id).await?;
        let mut acc = Waterfall {
            row,
            sources_enriched: Vec::new(),
            best_method: None,
            popularity: None,
            tags: Vec::new(),
            failures: Vec::new(),
        };

        // Step 0: title parse, always.
        let parsed = normalize_title_only(&acc.row.title, true);
        if !parsed.title.is_empty() && acc.row.normalized_title != parsed.title {
            acc.row.normalized_title = parsed.title.clone();
        }

        // Step 1: unknown-artist resolution.
        if is_unknown_artist(&acc.row.artist_name) {
            if let Some(resolver) = &self.resolver {
                match resolver
                    .resolve(track_id, &acc.row.title, acc.row.label.as_deref())
                    .await
                {
                    Ok(Some(resolution)) => {
                        if let Some(first) = resolution.artist_names.first() {
                            acc.row.artist_name = first.clone();
                        }
                        fill(&mut acc.row.label, resolution.label.clone());
                        acc.consider_method(AttributionMethod::FuzzyMatch {
                            similarity: resolution.confidence.max(0.80),
                        });
                        acc.mark_enriched(resolution.source.as_str());
                    }
                    Ok(None) => {}
                    Err(e) => acc.record_failure("artist_resolver", e),
                }
            }
        }

        // Step 2: Spotify by ID.
        if let (Some(spotify), Some(spotify_id)) =
            (&self.services.spotify, acc.row.spotify_id.clone())
        {
            match self
                .breakers
                .execute("spotify", || spotify.track_with_features(&spotify_id))
                .await
            {
                Ok(data) => {
                    acc.merge(&data);
                    acc.consider_method(AttributionMethod::ExactApiMatch);
                }
                Err(e) => acc.record_failure("spotify", e),
            }
        }

        // Step 3: ISRC lookups.
        if let Some(isrc) = acc.row.isrc.clone() {
            if acc.row.spotify_id.is_none() {
                if let Some(spotify) = &self.services.spotify {
                    match self
                        .breakers
                        .execute("spotify", || spotify.search_by_isrc(&isrc))
                        .await
                    {
                        Ok(Some(data)) => {
                            acc.merge(&data);
                            acc.consider_method(AttributionMethod::ExactApiMatch);
                        }
                        Ok(None) => {}
                        Err(e) => acc.record_failure("spotify", e),
                    }
                }
            }
            if acc.row.tidal_id.is_none() {
                if let Some(tidal) = &self.services.tidal {
                    match self
                        .breakers
                        .execute("tidal", || tidal.search_by_isrc(&isrc))
                        .await
                    {
                        Ok(Some(data)) => {
                            acc.merge(&data);
                            acc.consider_method(AttributionMethod::ExactApiMatch);
                        }
                        Ok(None) => {}
                        Err(e) => acc.record_failure("tidal", e),
                    }
                }
            }
            if acc.row.musicbrainz_id.is_none() {
                match self
                    .breakers
                    .execute("musicbrainz", || {
                        self.services.musicbrainz.lookup_by_isrc(&isrc)
                    })
                    .await
                {
                    Ok(Some(data)) => {
                        acc.merge(&data);
                        acc.consider_method(AttributionMethod::ExactApiMatch);
                    }
                    Ok(None) => {}
                    Err(e) => acc.record_failure("musicbrainz", e),
                }
            }
        }

        // Step 4: text search on Spotify, then Tidal.
        let artist = acc.row.artist_name.clone();
        let title = acc.row.title.clone();
        if acc.row.spotify_id.is_none() && !is_unknown_artist(&artist) {
            if let Some(spotify) = &self.services.spotify {
                match self
                    .breakers
                    .execute("spotify", || spotify.search_text(&artist, &title))
                    .await
                {
                    Ok(Some(data)) => {
                        self.consider_text_match(&mut acc, &data);
                        acc.merge(&data);
                    }
                    Ok(None) => {}
                    Err(e) => acc.record_failure("spotify", e),
                }
            }
        }
        if acc.row.tidal_id.is_none() && !is_unknown_artist(&artist) {
            if let Some(tidal) = &self.services.tidal {
                match self
                    .breakers
                    .execute("tidal", || tidal.search_text(&artist, &title))
                    .await
                {
                    Ok(Some(data)) => {
                        self.consider_text_match(&mut acc, &data);
                        acc.merge(&data);
                    }
                    Ok(None) => {}
                    Err(e) => acc.record_failure("tidal", e),
                }
            }
        }

        // Step 5: MusicBrainz text search; may recover an ISRC.
        if acc.row.musicbrainz_id.is_none() && !is_unknown_artist(&artist) {
            match self
                .breakers
                .execute("musicbrainz", || {
                    self.services.musicbrainz.search_recording(&artist, &title)
                })
                .await
            {
                Ok(Some(data)) => {
                    self.consider_text_match(&mut acc, &data);
                    acc.merge(&data);
                }
                Ok(None) => {}
                Err(e) => acc.record_failure("musicbrainz", e),
            }
        }

        // Step 6: Discogs release/label metadata.
        if let Some(discogs) = &self.services.discogs {
            let query = format!("{} {}", artist, title);
            let label = acc.row.label.clone();
            match self
                .breakers
                .execute("discogs", || {
                    discogs.search_release(&query, label.as_deref())
                })
                .await
            {
                Ok(Some(data)) => {
                    acc.merge(&data);
                    acc.consider_method(AttributionMethod::CommunitySource);
                }
                Ok(None) => {}
                Err(e) => acc.record_failure("discogs", e),
            }
        }

        // Step 7: Last.fm tags and popularity.
        if let Some(lastfm) = &self.services.lastfm {
            match self
                .breakers
                .execute("lastfm", || lastfm.track_info(&artist, &title))
                .await
            {
                Ok(Some(data)) => {
                    let mut data = data;
                    // The top community tag doubles as a genre fallback.
                    if data.genre.is_none() {
                        data.genre = data.tags.first().cloned();
                    }
                    acc.merge(&data);
                    acc.consider_method(AttributionMethod::CommunitySource);
                }
                Ok(None) => {}
                Err(e) => acc.record_failure("lastfm", e),
            }
        }

        // Step 8: audio-feature fallbacks, fill-if-absent only.
        if acc.row.bpm.is_none() || acc.row.key.is_none() {
            if let Some(mbid) = acc.row.musicbrainz_id.clone() {
                match self
                    .breakers
                    .execute("acousticbrainz", || {
                        self.services.acousticbrainz.features_by_mbid(&mbid)
                    })
                    .await
                {
                    Ok(Some(data)) => acc.merge(&data),
                    Ok(None) => {}
                    Err(e) => acc.record_failure("acousticbrainz", e),
                }
            }
        }
        if acc.row.bpm.is_none() || acc.row.key.is_none() {
            if let Some(getsongbpm) = &self.services.getsongbpm {
                match self
                    .breakers
                    .execute("getsongbpm", || getsongbpm.search(&artist, &title))
                    .await
                {
                    Ok(Some(data)) => acc.merge(&data),
                    Ok(None) => {}
                    Err(e) => acc.record_failure("getsongbpm", e),
                }
            }
        }

        // Step 9: Camelot derivation from whatever key we ended up with.
        if acc.row.camelot_key.is_none() {
            acc.row.camelot_key = acc
                .row
                .key
                .as_deref()
                .and_then(CamelotKey::from_key_name)
                .map(|camelot| camelot.to_string());
        }

        // Step 10: confidence, persistence, status.
        let outcome = self.finalize(acc).await?;
        info!(
            track_id = %outcome.track_id,
            status = %outcome.status,
            confidence = outcome.confidence_score,
            sources = ?outcome.sources_enriched,
            "enrichment finished"
        );
        Ok(outcome)
    }

    /// Text-search hits are graded by how well the returned title matches:
    /// an exact normalized title with a known label is a disambiguated
    /// match, anything else goes through the fuzzy tier.
    fn consider_text_match(&self, acc: &mut Waterfall, data: &ExternalTrackData) {
        let similarity = data
            .title
            .as_deref()
            .map(|candidate| title_similarity(&acc.row.title, candidate))
            .unwrap_or(0.0);
        if similarity >= 0.99 && acc.row.label.is_some() {
            acc.consider_method(AttributionMethod::DisambiguatedText);
        } else if similarity >= crate::matching::MIN_ACCEPTABLE_CONFIDENCE {
            acc.consider_method(AttributionMethod::FuzzyMatch { similarity });
        } else {
            debug!(
                service = data.service,
                similarity = similarity,
                "text match below acceptance floor, metadata kept but not attributed"
            );
        }
    }

    async fn finalize(&self, mut acc: Waterfall) -> Result<EnrichmentOutcome> {
        let method = acc
            .best_method
            .take()
            .unwrap_or(AttributionMethod::ContextualInference);
        let (dj_affinity, coherence) = self.contextual_signals(&acc.row).await?;
        let score = score_with_context(method, dj_affinity, coherence);
        let confidence_score = score.final_score();
        let confidence_tier = score.tier();

        let is_retriable = acc.failures.iter().any(|(_, e)| e.is_retriable());
        let error_message = acc.failures.first().map(|(service, e)| {
            if acc.failures.len() > 1 {
                format!("{}: {} (+{} more)", service, e, acc.failures.len() - 1)
            } else {
                format!("{}: {}", service, e)
            }
        });
        let status = match (acc.sources_enriched.is_empty(), acc.failures.is_empty()) {
            (false, true) => EnrichmentState::Completed,
            (false, false) => EnrichmentState::Partial,
            (true, true) => EnrichmentState::Completed,
            (true, false) => EnrichmentState::Failed,
        };

        self.persist(&acc, confidence_score).await?;
        self.upsert_status(
            &acc,
            status,
            confidence_score,
            confidence_tier,
            is_retriable,
            error_message.clone(),
        )
        .await?;

        Ok(EnrichmentOutcome {
            track_id: acc.row.track_id,
            status,
            sources_enriched: acc.sources_enriched,
            confidence_score,
            confidence_tier,
            is_retriable,
            error_message,
        })
    }

    async fn persist(&self, acc: &Waterfall, confidence: f64) -> Result<()> {
        let row = &acc.row;
        let metadata_patch = serde_json::json!({
            "enrichment": {
                "sources": acc.sources_enriched,
                "tags": acc.tags,
                "popularity": acc.popularity,
                "confidence": confidence,
                "enriched_at": Utc::now(),
            }
        });

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE silver_tracks SET
                normalized_title = $2,
                artist_name = $3,
                duration_ms = COALESCE(silver_tracks.duration_ms, $4),
                bpm = COALESCE(silver_tracks.bpm, $5),
                key = COALESCE(silver_tracks.key, $6),
                camelot_key = COALESCE(silver_tracks.camelot_key, $7),
                energy = COALESCE(silver_tracks.energy, $8),
                danceability = COALESCE(silver_tracks.danceability, $9),
                valence = COALESCE(silver_tracks.valence, $10),
                genre = COALESCE(silver_tracks.genre, $11),
                label = COALESCE(silver_tracks.label, $12),
                isrc = COALESCE(silver_tracks.isrc, $13),
                spotify_id = COALESCE(silver_tracks.spotify_id, $14),
                tidal_id = COALESCE(silver_tracks.tidal_id, $15),
                musicbrainz_id = COALESCE(silver_tracks.musicbrainz_id, $16),
                discogs_id = COALESCE(silver_tracks.discogs_id, $17),
                metadata = COALESCE(silver_tracks.metadata, '{}'::jsonb) || $18,
                updated_at = NOW()
            WHERE track_id = $1
            "#,
        )
        .bind(row.track_id)
        .bind(&row.normalized_title)
        .bind(&row.artist_name)
        .bind(row.duration_ms)
        .bind(row.bpm)
        .bind(&row.key)
        .bind(&row.camelot_key)
        .bind(row.energy)
        .bind(row.danceability)
        .bind(row.valence)
        .bind(&row.genre)
        .bind(&row.label)
        .bind(&row.isrc)
        .bind(&row.spotify_id)
        .bind(&row.tidal_id)
        .bind(&row.musicbrainz_id)
        .bind(&row.discogs_id)
        .bind(&metadata_patch)
        .execute(&mut *tx)
        .await?;

        // Make sure the primary artist credit exists as a silver artist and
        // is linked.
        if !is_unknown_artist(&row.artist_name) {
            let artist = upsert_artist(&mut tx, &row.artist_name, &[], None).await?;
            sqlx::query(
                r#"
                INSERT INTO silver_track_artists (track_id, artist_id, role)
                VALUES ($1, $2, 'primary')
                ON CONFLICT (track_id, artist_id, role) DO NOTHING
                "#,
            )
            .bind(row.track_id)
            .bind(artist.artist_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_status(
        &self,
        acc: &Waterfall,
        status: EnrichmentState,
        confidence_score: f64,
        confidence_tier: ConfidenceTier,
        is_retriable: bool,
        error_message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_status
                (track_id, status, sources_enriched, retry_count, last_attempt,
                 is_retriable, error_message, confidence_score, confidence_tier)
            VALUES ($1, $2, $3, 0, NOW(), $4, $5, $6, $7)
            ON CONFLICT (track_id) DO UPDATE SET
                status = EXCLUDED.status,
                sources_enriched = EXCLUDED.sources_enriched,
                retry_count = enrichment_status.retry_count + 1,
                last_attempt = NOW(),
                is_retriable = EXCLUDED.is_retriable,
                error_message = EXCLUDED.error_message,
                confidence_score = EXCLUDED.confidence_score,
                confidence_tier = EXCLUDED.confidence_tier
            "#,
        )
        .bind(acc.row.track_id)
        .bind(status.as_str())
        .bind(&acc.sources_enriched)
        .bind(is_retriable)
        .bind(&error_message)
        .bind(confidence_score)
        .bind(confidence_tier.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Context signals for the confidence boost: does a containing setlist's
    /// DJ overlap the track's artists, and does the track's BPM sit inside
    /// the setlist's neighborhood?
    async fn contextual_signals(&self, row: &TrackRow) -> Result<(bool, bool)> {
        let affinity_row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM silver_playlist_tracks pt
                JOIN silver_playlists p ON p.playlist_id = pt.playlist_id
                JOIN silver_track_artists ta
                  ON ta.track_id = pt.track_id AND ta.artist_id = p.dj_artist_id
                WHERE pt.track_id = $1
            ) AS affinity
            "#,
        )
        .bind(row.track_id)
        .fetch_one(&self.pool)
        .await?;
        let dj_affinity: bool = affinity_row.try_get("affinity")?;

        let coherence = match row.bpm {
            None => false,
            Some(bpm) => {
                let avg_row = sqlx::query(
                    r#"
                    SELECT AVG(t.bpm) AS avg_bpm
                    FROM silver_playlist_tracks pt
                    JOIN silver_playlist_tracks sibling
                      ON sibling.playlist_id = pt.playlist_id
                     AND sibling.track_id <> pt.track_id
                    JOIN silver_tracks t ON t.track_id = sibling.track_id
                    WHERE pt.track_id = $1 AND t.bpm IS NOT NULL
                    "#,
                )
                .bind(row.track_id)
                .fetch_one(&self.pool)
                .await?;
                let avg_bpm: Option<f64> = avg_row.try_get("avg_bpm")?;
                avg_bpm.map_or(false, |avg| (bpm - avg).abs() <= avg * 0.08)
            }
        };

        Ok((dj_affinity, coherence))
    }

    async fn load_track(&self, track_id: Uuid) -> Result<TrackRow> {
        let row = sqlx::query(
            r#"
            SELECT track_id, title, normalized_title, artist_name, duration_ms, bpm,
                   key, camelot_key, energy, danceability, valence, genre, label,
                   isrc, spotify_id, tidal_id, musicbrainz_id, discogs_id
            FROM silver_tracks
            WHERE track_id = $1
            "#,
        )
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::NotFound {
            resource: format!("track {}", track_id),
        })?;

        Ok(TrackRow {
            track_id: row.try_get("track_id")?,
            title: row.try_get("title")?,
            normalized_title: row.try_get("normalized_title")?,
            artist_name: row.try_get("artist_name")?,
            duration_ms: row.try_get("duration_ms")?,
            bpm: row.try_get("bpm")?,
            key: row.try_get("key")?,
            camelot_key: row.try_get("camelot_key")?,
            energy: row.try_get("energy")?,
            danceability: row.try_get("danceability")?,
            valence: row.try_get("valence")?,
            genre: row.try_get("genre")?,
            label: row.try_get("label")?,
            isrc: row.try_get("isrc")?,
            spotify_id: row.try_get("spotify_id")?,
            tidal_id: row.try_get("tidal_id")?,
            musicbrainz_id: row.try_get("musicbrainz_id")?,
            discogs_id: row.try_get("discogs_id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_track_data_empty() {
        let data = ExternalTrackData::empty("spotify");
        assert_eq!(data.service, "spotify");
        assert!(data.artists.is_empty());
        assert!(data.isrc.is_none());
    }

    #[test]
    fn test_fill_only_when_absent() {
        let mut slot = Some(1);
        fill(&mut slot, Some(2));
        assert_eq!(slot, Some(1));

        let mut empty: Option<i32> = None;
        fill(&mut empty, Some(2));
        assert_eq!(empty, Some(2));
    }
}
