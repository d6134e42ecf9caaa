//! Multi-tier artist resolution for tracks with missing or "Unknown"
//! artists.
//!
//! Tier 1 works entirely from the internal silver layer: mashup-component
//! lookup, then the artist-label association map. Tier 2 queries external
//! community sources in priority order (1001Tracklists, then Discogs when a
//! label is known, then MixesDB). Tier 3 is the feedback loop: any Tier-2
//! success is written back as silver facts and invalidates the in-memory
//! label map, so future Tier-1 calls resolve internally.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::matching::title_similarity;
use crate::normalize::{clean_artist_credit, normalize_title_only};
use crate::services::enrichment::discogs::DiscogsClient;
use crate::services::transformer::upsert_artist;

/// Artist values that mean "we do not actually know".
pub fn is_unknown_artist(artist: &str) -> bool {
    let trimmed = artist.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("unknown")
        || trimmed.eq_ignore_ascii_case("unknown artist")
        || trimmed.eq_ignore_ascii_case("various artists")
        || trimmed.eq_ignore_ascii_case("va")
        || trimmed == "?"
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    InternalMashup,
    InternalLabelMap,
    External1001Tracklists,
    ExternalDiscogs,
    ExternalMixesdb,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalMashup => "internal_mashup",
            Self::InternalLabelMap => "internal_label_map",
            Self::External1001Tracklists => "external_1001tracklists",
            Self::ExternalDiscogs => "external_discogs",
            Self::ExternalMixesdb => "external_mixesdb",
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::External1001Tracklists | Self::ExternalDiscogs | Self::ExternalMixesdb
        )
    }
}

/// A resolved artist attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistResolution {
    pub artist_names: Vec<String>,
    pub label: Option<String>,
    pub source: ResolutionSource,
    pub confidence: f64,
}

/// One hit from a community tracklist search.
#[derive(Debug, Clone)]
pub struct CommunityTrackHit {
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Community tracklist sources (1001Tracklists, MixesDB) present this
/// search surface; production implementations sit behind the scraping
/// adapters, tests use scripted stand-ins.
#[async_trait]
pub trait CommunityLookup: Send + Sync {
    async fn search_track(&self, query: &str) -> Result<Vec<CommunityTrackHit>>;
}

type LabelMap = HashMap<String, Vec<(String, i64)>>;

pub struct MultiTierArtistResolver {
    pool: PgPool,
    tracklists_1001: Option<Arc<dyn CommunityLookup>>,
    mixesdb: Option<Arc<dyn CommunityLookup>>,
    discogs: Option<Arc<DiscogsClient>>,
    /// Lazily built label -> artist counters; invalidated (not refreshed)
    /// on feedback-loop inserts.
    label_map: tokio::sync::RwLock<Option<LabelMap>>,
}

/// Mashup component title similarity floor.
const MASHUP_COMPONENT_THRESHOLD: f64 = 0.7;
/// Label-map title similarity floor.
const LABEL_MAP_TITLE_THRESHOLD: f64 = 0.6;
/// Only labels with at least this many artist-linked tracks enter the map.
const LABEL_MAP_MIN_TRACKS: i64 = 2;
/// Candidate artists examined per label.
const LABEL_MAP_TOP_ARTISTS: usize = 5;

impl MultiTierArtistResolver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tracklists_1001: None,
            mixesdb: None,
            discogs: None,
            label_map: tokio::sync::RwLock::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn with_tracklists_1001(mut self, client: Arc<dyn CommunityLookup>) -> Self {
        self.tracklists_1001 = Some(client);
        self
    }

    pub fn with_mixesdb(mut self, client: Arc<dyn CommunityLookup>) -> Self {
        self.mixesdb = Some(client);
        self
    }

    pub fn with_discogs(mut self, client: Arc<DiscogsClient>) -> Self {
        self.discogs = Some(client);
        self
    }

    /// Resolve the artist for a track. On success the track is updated and
    /// (for external sources) the internal knowledge base enriched.
    ///
    /// State machine: parse -> tier1_mashup -> tier1_label_map ->
    /// tier2_1001tl -> tier2_discogs -> tier2_mixesdb -> fail. Terminal on
    /// first success or exhaustion.
    pub async fn resolve(
        &self,
        track_id: Uuid,
        track_title: &str,
        existing_label: Option<&str>,
    ) -> Result<Option<ArtistResolution>> {
        let (clean_title, extracted_label) = extract_label(track_title);
        let label = existing_label
            .map(|l| l.to_string())
            .or(extracted_label);
        let components = mashup_components(&clean_title);

        debug!(
            track_id = %track_id,
            title = %clean_title,
            label = ?label,
            mashup = components.is_some(),
            "starting artist resolution"
        );

        // Tier 1: mashup components, all resolved internally.
        if let Some(components) = &components {
            if let Some(resolution) = self
                .resolve_mashup_internal(components, label.as_deref())
                .await?
            {
                self.apply_resolution(track_id, &resolution).await?;
                return Ok(Some(resolution));
            }
        }

        // Tier 1: artist-label map.
        if let Some(label) = label.as_deref() {
            if let Some(resolution) = self.resolve_from_label_map(&clean_title, label).await? {
                self.apply_resolution(track_id, &resolution).await?;
                return Ok(Some(resolution));
            }
        }

        // Tier 2: external sources, first success wins.
        if let Some(resolution) = self
            .resolve_external(&clean_title, label.as_deref())
            .await?
        {
            self.apply_resolution(track_id, &resolution).await?;
            // Tier 3: external facts become internal knowledge.
            self.invalidate_label_map().await;
            return Ok(Some(resolution));
        }

        debug!(track_id = %track_id, title = %clean_title, "artist resolution exhausted");
        Ok(None)
    }

    async fn resolve_mashup_internal(
        &self,
        components: &[String],
        label: Option<&str>,
    ) -> Result<Option<ArtistResolution>> {
        let mut all_artists: Vec<String> = Vec::new();
        for component in components {
            match self.find_component_artists(component).await? {
                Some(artists) => {
                    for artist in artists {
                        if !all_artists.iter().any(|a| a.eq_ignore_ascii_case(&artist)) {
                            all_artists.push(artist);
                        }
                    }
                }
                None => {
                    debug!(component = %component, "mashup component not found internally");
                    return Ok(None);
                }
            }
        }
        if all_artists.is_empty() {
            return Ok(None);
        }
        info!(artists = ?all_artists, "mashup fully resolved from internal db");
        Ok(Some(ArtistResolution {
            artist_names: all_artists,
            label: label.map(|l| l.to_string()),
            source: ResolutionSource::InternalMashup,
            confidence: 0.9,
        }))
    }

    /// Artists of the best internally-known track matching a component
    /// title, at similarity > 0.7.
    async fn find_component_artists(&self, component: &str) -> Result<Option<Vec<String>>> {
        let normalized = normalize_title_only(component, true).title;
        if normalized.is_empty() {
            return Ok(None);
        }
        let rows = sqlx::query(
            r#"
            SELECT t.normalized_title, a.canonical_name
            FROM silver_tracks t
            JOIN silver_track_artists ta ON ta.track_id = t.track_id
            JOIN silver_artists a ON a.artist_id = ta.artist_id
            WHERE ta.role = 'primary'
              AND t.normalized_title ILIKE '%' || $1 || '%'
            LIMIT 50
            "#,
        )
        .bind(&normalized)
        .fetch_all(&self.pool)
        .await?;

        let mut best: Option<(f64, Vec<String>)> = None;
        let mut by_title: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let title: String = row.try_get("normalized_title")?;
            let artist: String = row.try_get("canonical_name")?;
            by_title.entry(title).or_default().push(artist);
        }
        for (title, artists) in by_title {
            let similarity = title_similarity(&normalized, &title);
            if similarity > MASHUP_COMPONENT_THRESHOLD
                && best.as_ref().map_or(true, |(s, _)| similarity > *s)
            {
                best = Some((similarity, artists));
            }
        }
        Ok(best.map(|(_, artists)| artists))
    }

    async fn resolve_from_label_map(
        &self,
        clean_title: &str,
        label: &str,
    ) -> Result<Option<ArtistResolution>> {
        self.ensure_label_map().await?;
        let map_guard = self.label_map.read().await;
        let Some(map) = map_guard.as_ref() else {
            return Ok(None);
        };

        let label_key = label.trim().to_lowercase();
        // Exact label first, then partial containment either way.
        let counter = map.get(&label_key).or_else(|| {
            map.iter()
                .find(|(known, _)| known.contains(&label_key) || label_key.contains(known.as_str()))
                .map(|(_, counter)| counter)
        });
        let Some(counter) = counter else {
            debug!(label = label, "no artist-label associations");
            return Ok(None);
        };

        let total: i64 = counter.iter().map(|(_, count)| count).sum();
        let normalized_title = normalize_title_only(clean_title, true).title;

        for (artist, count) in counter.iter().take(LABEL_MAP_TOP_ARTISTS) {
            let rows = sqlx::query(
                r#"
                SELECT t.normalized_title
                FROM silver_tracks t
                JOIN silver_track_artists ta ON ta.track_id = t.track_id
                JOIN silver_artists a ON a.artist_id = ta.artist_id
                WHERE a.canonical_name = $1 AND ta.role = 'primary'
                LIMIT 100
                "#,
            )
            .bind(artist)
            .fetch_all(&self.pool)
            .await?;

            let best_similarity = rows
                .iter()
                .filter_map(|row| row.try_get::<String, _>("normalized_title").ok())
                .map(|title| title_similarity(&normalized_title, &title))
                .fold(0.0f64, f64::max);

            if best_similarity > LABEL_MAP_TITLE_THRESHOLD {
                let label_share = *count as f64 / total.max(1) as f64;
                let confidence = best_similarity * 0.7 + label_share * 0.3;
                info!(
                    artist = %artist,
                    label = label,
                    similarity = best_similarity,
                    confidence = confidence,
                    "label-map resolution"
                );
                return Ok(Some(ArtistResolution {
                    artist_names: vec![artist.clone()],
                    label: Some(label.to_string()),
                    source: ResolutionSource::InternalLabelMap,
                    confidence,
                }));
            }
        }
        Ok(None)
    }

    async fn resolve_external(
        &self,
        clean_title: &str,
        label: Option<&str>,
    ) -> Result<Option<ArtistResolution>> {
        if let Some(client) = &self.tracklists_1001 {
            match self.query_1001tracklists(client.as_ref(), clean_title, label).await {
                Ok(Some(resolution)) => return Ok(Some(resolution)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "1001tracklists lookup failed"),
            }
        }

        if let (Some(discogs), Some(label)) = (&self.discogs, label) {
            match discogs.search_release(clean_title, Some(label)).await {
                Ok(Some(hit)) if !hit.artists.is_empty() => {
                    return Ok(Some(ArtistResolution {
                        artist_names: hit.artists,
                        label: Some(label.to_string()),
                        source: ResolutionSource::ExternalDiscogs,
                        confidence: 0.85,
                    }));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "discogs lookup failed"),
            }
        }

        if let Some(client) = &self.mixesdb {
            let query = match label {
                Some(label) => format!("{} {}", clean_title, label),
                None => clean_title.to_string(),
            };
            match client.search_track(&query).await {
                Ok(hits) => {
                    let artist = hits
                        .into_iter()
                        .filter_map(|hit| hit.artist)
                        .find(|artist| !is_unknown_artist(artist));
                    if let Some(artist) = artist {
                        return Ok(Some(ArtistResolution {
                            artist_names: vec![artist],
                            label: label.map(|l| l.to_string()),
                            source: ResolutionSource::ExternalMixesdb,
                            confidence: 0.70,
                        }));
                    }
                }
                Err(e) => warn!(error = %e, "mixesdb lookup failed"),
            }
        }

        Ok(None)
    }

    async fn query_1001tracklists(
        &self,
        client: &dyn CommunityLookup,
        clean_title: &str,
        label: Option<&str>,
    ) -> Result<Option<ArtistResolution>> {
        let query = match label {
            Some(label) => format!("{} {}", clean_title, label),
            None => clean_title.to_string(),
        };
        let hits = client.search_track(&query).await?;
        if hits.is_empty() {
            return Ok(None);
        }

        // Consistent attribution across many DJ sets beats one-off credits.
        let mut counts: HashMap<String, u32> = HashMap::new();
        for hit in &hits {
            if let Some(artist) = hit.artist.as_deref() {
                if !is_unknown_artist(artist) {
                    *counts.entry(artist.to_string()).or_default() += 1;
                }
            }
        }
        let Some((artist, occurrences)) = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        else {
            return Ok(None);
        };

        let confidence = (occurrences as f64 / 10.0).min(0.95);
        info!(
            artist = %artist,
            occurrences = occurrences,
            confidence = confidence,
            "1001tracklists attribution"
        );
        Ok(Some(ArtistResolution {
            artist_names: vec![artist],
            label: label.map(|l| l.to_string()),
            source: ResolutionSource::External1001Tracklists,
            confidence,
        }))
    }

    /// Write a resolution back: create artists, link them as primary, and
    /// fill the track's label if it was empty.
    async fn apply_resolution(
        &self,
        track_id: Uuid,
        resolution: &ArtistResolution,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut primary_set = false;
        for name in &resolution.artist_names {
            let cleaned = clean_artist_credit(name);
            if cleaned.is_empty() {
                continue;
            }
            let artist = upsert_artist(&mut tx, &cleaned, &[], None).await?;
            sqlx::query(
                r#"
                INSERT INTO silver_track_artists (track_id, artist_id, role)
                VALUES ($1, $2, 'primary')
                ON CONFLICT (track_id, artist_id, role) DO NOTHING
                "#,
            )
            .bind(track_id)
            .bind(artist.artist_id)
            .execute(&mut *tx)
            .await?;

            if !primary_set {
                sqlx::query(
                    r#"
                    UPDATE silver_tracks
                    SET artist_name = $2, updated_at = NOW()
                    WHERE track_id = $1
                    "#,
                )
                .bind(track_id)
                .bind(&cleaned)
                .execute(&mut *tx)
                .await?;
                primary_set = true;
            }
        }

        if let Some(label) = &resolution.label {
            sqlx::query(
                r#"
                UPDATE silver_tracks
                SET label = $2, updated_at = NOW()
                WHERE track_id = $1 AND (label IS NULL OR label = '')
                "#,
            )
            .bind(track_id)
            .bind(label)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            track_id = %track_id,
            artists = ?resolution.artist_names,
            source = resolution.source.as_str(),
            confidence = resolution.confidence,
            "track artist resolved"
        );
        Ok(())
    }

    async fn ensure_label_map(&self) -> Result<()> {
        {
            let map = self.label_map.read().await;
            if map.is_some() {
                return Ok(());
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT t.label, a.canonical_name, COUNT(*) AS track_count
            FROM silver_tracks t
            JOIN silver_track_artists ta ON ta.track_id = t.track_id
            JOIN silver_artists a ON a.artist_id = ta.artist_id
            WHERE t.label IS NOT NULL AND t.label <> '' AND ta.role = 'primary'
            GROUP BY t.label, a.canonical_name
            HAVING COUNT(*) >= $1
            ORDER BY t.label, track_count DESC
            "#,
        )
        .bind(LABEL_MAP_MIN_TRACKS)
        .fetch_all(&self.pool)
        .await?;

        let mut map: LabelMap = HashMap::new();
        for row in rows {
            let label: String = row.try_get("label")?;
            let artist: String = row.try_get("canonical_name")?;
            let count: i64 = row.try_get("track_count")?;
            map.entry(label.trim().to_lowercase())
                .or_default()
                .push((artist, count));
        }
        // Rows arrive ordered by count per label; keep that ordering.
        info!(labels = map.len(), "artist-label map loaded");
        *self.label_map.write().await = Some(map);
        Ok(())
    }

    /// Drop the cached label map; the next reader rebuilds it.
    pub async fn invalidate_label_map(&self) {
        *self.label_map.write().await = None;
        debug!("artist-label map invalidated");
    }
}

static LABEL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[([^\]]+)\]\s*$").unwrap());
static MASHUP_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+vs\.?\s+").unwrap());
static MIX_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\([^)]*mix\)\s*").unwrap());

/// Extract a trailing `[Label]` from a title.
pub fn extract_label(title: &str) -> (String, Option<String>) {
    if let Some(captures) = LABEL_SUFFIX.captures(title) {
        let label = captures.get(1).map(|m| m.as_str().trim().to_string());
        let clean = LABEL_SUFFIX.replace(title, "").trim().to_string();
        return (clean, label.filter(|l| !l.is_empty()));
    }
    (title.trim().to_string(), None)
}

/// Split a mashup title on " vs " joiners, stripping `(... Mix)` suffixes
/// from each component. Returns `None` for non-mashups.
pub fn mashup_components(title: &str) -> Option<Vec<String>> {
    let lower = title.to_lowercase();
    if !lower.contains(" vs ") && !lower.contains(" vs. ") {
        return None;
    }
    let components: Vec<String> = MASHUP_SPLIT
        .split(title)
        .map(|part| MIX_SUFFIX.replace_all(part, "").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();
    if components.len() < 2 {
        return None;
    }
    Some(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_label() {
        let (title, label) = extract_label("Take Off [Woofer]");
        assert_eq!(title, "Take Off");
        assert_eq!(label.as_deref(), Some("Woofer"));

        let (title, label) = extract_label("Regular Track");
        assert_eq!(title, "Regular Track");
        assert_eq!(label, None);
    }

    #[test]
    fn test_mashup_components() {
        let components = mashup_components("Take Off vs Night Train").unwrap();
        assert_eq!(components, vec!["Take Off", "Night Train"]);

        let components =
            mashup_components("Take Off (Original Mix) vs. Night Train (Club Mix)").unwrap();
        assert_eq!(components, vec!["Take Off", "Night Train"]);

        let components = mashup_components("One vs Two vs Three").unwrap();
        assert_eq!(components.len(), 3);

        assert!(mashup_components("Losing It (Fisher Remix)").is_none());
    }

    #[test]
    fn test_unknown_artist_detection() {
        assert!(is_unknown_artist("Unknown"));
        assert!(is_unknown_artist("unknown artist"));
        assert!(is_unknown_artist("Various Artists"));
        assert!(is_unknown_artist(""));
        assert!(is_unknown_artist("  ?  "));
        assert!(!is_unknown_artist("FISHER"));
    }

    #[test]
    fn test_resolution_source_strings() {
        assert_eq!(
            ResolutionSource::InternalMashup.as_str(),
            "internal_mashup"
        );
        assert!(ResolutionSource::ExternalDiscogs.is_external());
        assert!(!ResolutionSource::InternalLabelMap.is_external());
    }
}
