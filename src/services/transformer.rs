//! Bronze-to-silver transformer.
//!
//! Reads unprocessed bronze rows in dependency order (artists before tracks
//! before playlists before the rows that link them), validates and
//! normalizes each payload, upserts silver entities on their natural keys,
//! and flags the bronze row processed in the same transaction as the silver
//! writes.
//!
//! Failure semantics: a malformed payload increments the error counter and
//! stays unprocessed so an adapter fix can retry it; a payload missing
//! required fields is counted `skipped_invalid` and marked processed so it
//! never blocks the queue.

use chrono::NaiveDate;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::camelot::CamelotKey;
use crate::error::{PipelineError, Result};
use crate::models::{
    clamp_bpm, BronzePayload, Playlist, PlaylistBronze, PlaylistTrackBronze, RawScrape,
    ScrapeType, TrackAdjacencyBronze, TrackArtistBronze, TrackBronze, TrackTransition,
    ValidationStatus,
};
use crate::normalize::{clean_artist_credit, normalize_artist_name, normalize_title_only};
use crate::services::bronze_store::BronzeStore;

/// Counters for one transformer pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformStats {
    pub bronze_records_processed: u64,
    pub tracks_created: u64,
    pub artists_created: u64,
    pub playlists_created: u64,
    pub playlist_tracks_created: u64,
    pub track_transitions_created: u64,
    pub track_artists_linked: u64,
    pub errors: u64,
    pub skipped_invalid: u64,
}

pub struct Transformer {
    bronze: BronzeStore,
    pool: PgPool,
    dry_run: bool,
}

impl Transformer {
    pub fn new(pool: PgPool, dry_run: bool) -> Self {
        Self {
            bronze: BronzeStore::new(pool.clone()),
            pool,
            dry_run,
        }
    }

    /// One full pass over unprocessed bronze, dependency-ordered.
    pub async fn run(&self, limit: i64) -> Result<TransformStats> {
        let mut stats = TransformStats::default();
        let mut touched_playlists = std::collections::HashSet::new();
        for scrape_type in ScrapeType::DEPENDENCY_ORDER {
            let rows = self.bronze.fetch_unprocessed(scrape_type, limit).await?;
            if rows.is_empty() {
                continue;
            }
            info!(
                scrape_type = %scrape_type,
                count = rows.len(),
                dry_run = self.dry_run,
                "transforming bronze batch"
            );
            for row in rows {
                self.process_row(&row, &mut stats, &mut touched_playlists)
                    .await?;
            }
        }

        if !self.dry_run {
            for playlist_id in &touched_playlists {
                self.derive_playlist_transitions(*playlist_id, &mut stats)
                    .await?;
            }
        }
        info!(?stats, "transformer pass complete");
        Ok(stats)
    }

    /// Reduce a playlist's ordered track sequence to adjacency edges.
    /// Consecutive tracks sharing an artist are a DJ playing through their
    /// own material and produce no edge.
    async fn derive_playlist_transitions(
        &self,
        playlist_id: Uuid,
        stats: &mut TransformStats,
    ) -> Result<()> {
        let rows = sqlx::query(
            r#"
            SELECT pt.position, pt.track_id, t.artist_name
            FROM silver_playlist_tracks pt
            JOIN silver_tracks t ON t.track_id = pt.track_id
            WHERE pt.playlist_id = $1
            ORDER BY pt.position ASC
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;

        let sequence: Vec<(i32, Uuid, String)> = rows
            .into_iter()
            .map(|row| {
                Ok::<_, sqlx::Error>((
                    row.try_get::<i32, _>("position")?,
                    row.try_get::<Uuid, _>("track_id")?,
                    row.try_get::<String, _>("artist_name")?,
                ))
            })
            .collect::<std::result::Result<_, _>>()?;

        let mut tx = self.pool.begin().await?;
        for pair in sequence.windows(2) {
            let (pos_a, a, ref artist_a) = pair[0];
            let (pos_b, b, ref artist_b) = pair[1];
            if artist_a.eq_ignore_ascii_case(artist_b) {
                continue;
            }
            let Some((low, high)) = TrackTransition::canonical_pair(a, b) else {
                continue;
            };
            let distance = f64::from((pos_b - pos_a).max(1));
            sqlx::query(
                r#"
                INSERT INTO silver_track_transitions
                    (track_a_id, track_b_id, occurrence_count, avg_distance, last_observed_at)
                VALUES ($1, $2, 1, $3, NOW())
                ON CONFLICT (track_a_id, track_b_id) DO UPDATE SET
                    occurrence_count = silver_track_transitions.occurrence_count + 1,
                    avg_distance =
                        (silver_track_transitions.avg_distance
                            * silver_track_transitions.occurrence_count
                            + EXCLUDED.avg_distance)
                        / (silver_track_transitions.occurrence_count + 1),
                    last_observed_at = NOW()
                "#,
            )
            .bind(low)
            .bind(high)
            .bind(distance)
            .execute(&mut *tx)
            .await?;
            stats.track_transitions_created += 1;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn process_row(
        &self,
        row: &RawScrape,
        stats: &mut TransformStats,
        touched_playlists: &mut std::collections::HashSet<Uuid>,
    ) -> Result<()> {
        // Payloads may carry JSON nested inside JSON strings; flatten first.
        let raw_data = parse_nested_json(row.raw_data.clone());
        let payload = match BronzePayload::from_raw(row.scrape_type, &raw_data) {
            Ok(payload) => payload,
            Err(e) => {
                // Adapter bug: leave unprocessed for retry after a fix.
                warn!(scrape_id = %row.scrape_id, error = %e, "malformed bronze record");
                stats.errors += 1;
                return Ok(());
            }
        };

        if self.dry_run {
            stats.bronze_records_processed += 1;
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let outcome = match payload {
            BronzePayload::Artist(artist) => {
                let input = ArtistInput::from(&artist);
                self.apply_artist(&mut tx, row.scrape_id, &input, stats).await
            }
            BronzePayload::Track(track) => {
                self.apply_track(&mut tx, row.scrape_id, &track, stats).await
            }
            BronzePayload::Playlist(playlist) => {
                self.apply_playlist(&mut tx, row, &playlist, stats).await
            }
            BronzePayload::PlaylistTrack(link) => {
                self.apply_playlist_track(&mut tx, row, &link, stats, touched_playlists)
                    .await
            }
            BronzePayload::TrackAdjacency(adjacency) => {
                self.apply_adjacency(&mut tx, &adjacency, stats).await
            }
            BronzePayload::TrackArtist(relation) => {
                self.apply_track_artist(&mut tx, row.scrape_id, &relation, stats)
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                BronzeStore::mark_processed(&mut tx, &[row.scrape_id]).await?;
                tx.commit().await?;
                stats.bronze_records_processed += 1;
            }
            Err(e) if e.is_infrastructure() => {
                tx.rollback().await?;
                return Err(e);
            }
            Err(e) => {
                // Item-local failure: roll back this row only and count it.
                tx.rollback().await?;
                warn!(scrape_id = %row.scrape_id, error = %e, "bronze row failed");
                stats.errors += 1;
            }
        }
        Ok(())
    }

    async fn apply_artist(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        bronze_id: Uuid,
        artist: &ArtistInput<'_>,
        stats: &mut TransformStats,
    ) -> Result<()> {
        let name = clean_artist_credit(artist.name());
        if name.is_empty() {
            stats.skipped_invalid += 1;
            return Ok(());
        }
        let created = upsert_artist(tx, &name, artist.aliases(), Some(bronze_id)).await?;
        if created.newly_created {
            stats.artists_created += 1;
        }
        Ok(())
    }

    async fn apply_track(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        bronze_id: Uuid,
        track: &TrackBronze,
        stats: &mut TransformStats,
    ) -> Result<()> {
        let artist_name = clean_artist_credit(track.artist_name.trim());
        let title = track.track_name.trim();
        if artist_name.is_empty() || title.is_empty() {
            stats.skipped_invalid += 1;
            return Ok(());
        }

        let upserted = upsert_track(tx, bronze_id, track, &artist_name, title).await?;
        if upserted.newly_created {
            stats.tracks_created += 1;
        }
        Ok(())
    }

    async fn apply_playlist(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row: &RawScrape,
        playlist: &PlaylistBronze,
        stats: &mut TransformStats,
    ) -> Result<()> {
        let name = playlist.name.trim();
        if name.is_empty() {
            stats.skipped_invalid += 1;
            return Ok(());
        }

        let playlist_id = Playlist::stable_id(name, row.source);
        let event_date = playlist
            .event_date
            .as_deref()
            .and_then(parse_event_date_tolerant);
        if playlist.event_date.is_some() && event_date.is_none() {
            debug!(
                playlist = name,
                raw_date = ?playlist.event_date,
                "unparseable event date, storing null"
            );
        }

        let dj_artist_id = match playlist.dj_artist_name.as_deref() {
            Some(dj) if !dj.trim().is_empty() => {
                let upserted =
                    upsert_artist(tx, &clean_artist_credit(dj), &[], Some(row.scrape_id)).await?;
                Some(upserted.artist_id)
            }
            _ => None,
        };

        let quality = playlist_quality_score(playlist);
        let inserted = sqlx::query(
            r#"
            INSERT INTO silver_playlists
                (playlist_id, bronze_id, name, source, source_url, dj_artist_id,
                 event_date, venue, track_count, data_quality_score, validation_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (playlist_id) DO UPDATE SET
                source_url = COALESCE(silver_playlists.source_url, EXCLUDED.source_url),
                dj_artist_id = COALESCE(silver_playlists.dj_artist_id, EXCLUDED.dj_artist_id),
                event_date = COALESCE(silver_playlists.event_date, EXCLUDED.event_date),
                venue = COALESCE(silver_playlists.venue, EXCLUDED.venue),
                track_count = GREATEST(silver_playlists.track_count, EXCLUDED.track_count),
                updated_at = NOW()
            RETURNING (xmax = 0) AS newly_created
            "#,
        )
        .bind(playlist_id)
        .bind(row.scrape_id)
        .bind(name)
        .bind(row.source.as_str())
        .bind(&playlist.source_url)
        .bind(dj_artist_id)
        .bind(event_date)
        .bind(&playlist.venue)
        .bind(playlist.track_count.unwrap_or(0))
        .bind(quality)
        .bind(ValidationStatus::from_score(quality).as_str())
        .fetch_one(&mut **tx)
        .await?;

        if inserted.try_get::<bool, _>("newly_created")? {
            stats.playlists_created += 1;
        }
        Ok(())
    }

    async fn apply_playlist_track(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row: &RawScrape,
        link: &PlaylistTrackBronze,
        stats: &mut TransformStats,
        touched_playlists: &mut std::collections::HashSet<Uuid>,
    ) -> Result<()> {
        if link.track_title.trim().is_empty() && link.track_bronze_id.is_none() {
            stats.skipped_invalid += 1;
            return Ok(());
        }

        // Playlist resolution: bronze id first, then stable name hash.
        let playlist_id = match link.playlist_bronze_id {
            Some(bronze_id) => resolve_playlist_by_bronze(tx, bronze_id).await?,
            None => None,
        };
        let resolved = playlist_id.or_else(|| {
            link.playlist_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .map(|n| Playlist::stable_id(n, row.source))
        });
        let playlist_id = match resolved {
            Some(id) => {
                if playlist_exists(tx, id).await? {
                    id
                } else {
                    debug!(scrape_id = %row.scrape_id, "playlist_track references unknown playlist");
                    stats.skipped_invalid += 1;
                    return Ok(());
                }
            }
            None => {
                // Relation can never attach: drop it, keep the batch moving.
                debug!(scrape_id = %row.scrape_id, "playlist_track without resolvable playlist");
                stats.skipped_invalid += 1;
                return Ok(());
            }
        };

        let track_id = match link.track_bronze_id {
            Some(bronze_id) => resolve_track_by_bronze(tx, bronze_id).await?,
            None => None,
        };
        let track_id = match track_id {
            Some(id) => Some(id),
            None => {
                resolve_track_by_title(
                    tx,
                    &link.track_title,
                    link.artist_name.as_deref(),
                )
                .await?
            }
        };
        let Some(track_id) = track_id else {
            debug!(scrape_id = %row.scrape_id, title = %link.track_title,
                   "playlist_track without resolvable track");
            stats.skipped_invalid += 1;
            return Ok(());
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO silver_playlist_tracks (playlist_id, position, track_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (playlist_id, position) DO NOTHING
            "#,
        )
        .bind(playlist_id)
        .bind(link.position)
        .bind(track_id)
        .execute(&mut **tx)
        .await?;
        if inserted.rows_affected() > 0 {
            stats.playlist_tracks_created += 1;
            touched_playlists.insert(playlist_id);
        }
        Ok(())
    }

    async fn apply_adjacency(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        adjacency: &TrackAdjacencyBronze,
        stats: &mut TransformStats,
    ) -> Result<()> {
        let a = resolve_track_by_title(tx, &adjacency.track_a_title, None).await?;
        let b = resolve_track_by_title(tx, &adjacency.track_b_title, None).await?;
        let (Some(a), Some(b)) = (a, b) else {
            stats.skipped_invalid += 1;
            return Ok(());
        };
        let Some((low, high)) = TrackTransition::canonical_pair(a, b) else {
            // Self-loop, dropped by invariant.
            stats.skipped_invalid += 1;
            return Ok(());
        };

        sqlx::query(
            r#"
            INSERT INTO silver_track_transitions
                (track_a_id, track_b_id, occurrence_count, avg_distance, last_observed_at)
            VALUES ($1, $2, 1, $3, NOW())
            ON CONFLICT (track_a_id, track_b_id) DO UPDATE SET
                occurrence_count = silver_track_transitions.occurrence_count + 1,
                avg_distance =
                    (silver_track_transitions.avg_distance
                        * silver_track_transitions.occurrence_count
                        + EXCLUDED.avg_distance)
                    / (silver_track_transitions.occurrence_count + 1),
                last_observed_at = NOW()
            "#,
        )
        .bind(low)
        .bind(high)
        .bind(f64::from(adjacency.distance.max(1)))
        .execute(&mut **tx)
        .await?;
        stats.track_transitions_created += 1;
        Ok(())
    }

    async fn apply_track_artist(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        bronze_id: Uuid,
        relation: &TrackArtistBronze,
        stats: &mut TransformStats,
    ) -> Result<()> {
        let artist_name = clean_artist_credit(&relation.artist_name);
        let title = relation.track_title.trim();
        if artist_name.is_empty() || title.is_empty() {
            stats.skipped_invalid += 1;
            return Ok(());
        }
        let role: crate::models::ArtistRole = relation
            .role
            .parse()
            .unwrap_or(crate::models::ArtistRole::Primary);

        let artist = upsert_artist(tx, &artist_name, &[], Some(bronze_id)).await?;
        if artist.newly_created {
            stats.artists_created += 1;
        }

        let track_id = match resolve_track_by_title(tx, title, Some(&artist_name)).await? {
            Some(id) => id,
            None => {
                let track = TrackBronze {
                    artist_name: artist_name.clone(),
                    track_name: title.to_string(),
                    ..Default::default()
                };
                let upserted = upsert_track(tx, bronze_id, &track, &artist_name, title).await?;
                if upserted.newly_created {
                    stats.tracks_created += 1;
                }
                upserted.track_id
            }
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO silver_track_artists (track_id, artist_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (track_id, artist_id, role) DO NOTHING
            "#,
        )
        .bind(track_id)
        .bind(artist.artist_id)
        .bind(role.as_str())
        .execute(&mut **tx)
        .await?;
        if inserted.rows_affected() > 0 {
            stats.track_artists_linked += 1;
        }
        Ok(())
    }
}

/// Borrowed view letting artist upserts serve both artist payloads and other
/// rows that embed an artist credit.
pub struct ArtistInput<'a> {
    name: &'a str,
    aliases: &'a [String],
}

impl<'a> ArtistInput<'a> {
    fn name(&self) -> &str {
        self.name
    }
    fn aliases(&self) -> &[String] {
        self.aliases
    }
}

impl<'a> From<&'a crate::models::ArtistBronze> for ArtistInput<'a> {
    fn from(artist: &'a crate::models::ArtistBronze) -> Self {
        Self {
            name: &artist.artist_name,
            aliases: &artist.aliases,
        }
    }
}

pub struct UpsertedArtist {
    pub artist_id: Uuid,
    pub newly_created: bool,
}

/// Upsert an artist on its normalized name, merging aliases (set union) and
/// appending bronze lineage.
pub async fn upsert_artist(
    tx: &mut Transaction<'_, Postgres>,
    canonical_name: &str,
    aliases: &[String],
    bronze_id: Option<Uuid>,
) -> Result<UpsertedArtist> {
    let normalized = normalize_artist_name(canonical_name);
    if normalized.is_empty() {
        return Err(PipelineError::Validation(format!(
            "artist name normalizes to empty: {:?}",
            canonical_name
        )));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO silver_artists
            (artist_id, canonical_name, normalized_name, aliases, bronze_ids)
        VALUES ($1, $2, $3, $4, CASE WHEN $5::uuid IS NULL
                                     THEN ARRAY[]::uuid[]
                                     ELSE ARRAY[$5::uuid] END)
        ON CONFLICT (normalized_name) DO UPDATE SET
            aliases = (
                SELECT ARRAY(
                    SELECT DISTINCT alias
                    FROM unnest(silver_artists.aliases || EXCLUDED.aliases) AS alias
                    ORDER BY alias
                )
            ),
            bronze_ids = CASE WHEN $5::uuid IS NULL
                              THEN silver_artists.bronze_ids
                              ELSE array_append(silver_artists.bronze_ids, $5::uuid) END,
            updated_at = NOW()
        RETURNING artist_id, (xmax = 0) AS newly_created
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(canonical_name)
    .bind(&normalized)
    .bind(aliases)
    .bind(bronze_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(UpsertedArtist {
        artist_id: row.try_get("artist_id")?,
        newly_created: row.try_get("newly_created")?,
    })
}

pub struct UpsertedTrack {
    pub track_id: Uuid,
    pub newly_created: bool,
}

/// Upsert a track. Dedup key is ISRC when one is present and already owned
/// by a silver row (merge into the owner), otherwise `(artist_name,
/// normalized_title)`.
pub async fn upsert_track(
    tx: &mut Transaction<'_, Postgres>,
    bronze_id: Uuid,
    track: &TrackBronze,
    artist_name: &str,
    title: &str,
) -> Result<UpsertedTrack> {
    let normalized = normalize_title_only(title, true);
    let quality = track_quality_score(track);
    let bpm = track.bpm.map(clamp_bpm);
    let camelot = track
        .musical_key
        .as_deref()
        .and_then(CamelotKey::from_key_name)
        .map(|k| k.to_string());
    let is_mashup = detect_mashup(title);
    let is_remix = track.is_remix.unwrap_or(normalized.is_remix);
    let (is_live, is_cover) = match track.track_type.as_deref() {
        Some("live") => (true, false),
        Some("cover") => (false, true),
        _ => (false, false),
    };

    // ISRC uniqueness: if another silver track already owns this ISRC, merge
    // into it instead of inserting a duplicate recording.
    if let Some(isrc) = track.isrc.as_deref().filter(|s| !s.is_empty()) {
        let owner = sqlx::query(
            "SELECT track_id FROM silver_tracks WHERE isrc = $1",
        )
        .bind(isrc)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(owner_row) = owner {
            let owner_id: Uuid = owner_row.try_get("track_id")?;
            sqlx::query(
                r#"
                UPDATE silver_tracks SET
                    bpm = COALESCE(bpm, $2),
                    key = COALESCE(key, $3),
                    camelot_key = COALESCE(camelot_key, $4),
                    genre = COALESCE(genre, $5),
                    label = COALESCE(label, $6),
                    spotify_id = COALESCE(spotify_id, $7),
                    duration_ms = COALESCE(duration_ms, $8),
                    updated_at = NOW()
                WHERE track_id = $1
                "#,
            )
            .bind(owner_id)
            .bind(bpm)
            .bind(&track.musical_key)
            .bind(&camelot)
            .bind(&track.genre)
            .bind(&track.record_label)
            .bind(&track.spotify_id)
            .bind(track.duration_ms)
            .execute(&mut **tx)
            .await?;
            return Ok(UpsertedTrack {
                track_id: owner_id,
                newly_created: false,
            });
        }
    }

    let metadata = serde_json::json!({
        "label": track.record_label,
        "remix_type": track.remix_type,
        "track_type": track.track_type,
        "data_source": track.data_source,
        "original": track.metadata,
    });

    let row = sqlx::query(
        r#"
        INSERT INTO silver_tracks
            (track_id, bronze_id, title, normalized_title, artist_name, duration_ms,
             bpm, key, camelot_key, genre, label, isrc, spotify_id,
             is_remix, is_mashup, is_live, is_cover,
             validation_status, data_quality_score, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20)
        ON CONFLICT (artist_name, normalized_title) DO UPDATE SET
            duration_ms = COALESCE(silver_tracks.duration_ms, EXCLUDED.duration_ms),
            bpm = COALESCE(silver_tracks.bpm, EXCLUDED.bpm),
            key = COALESCE(silver_tracks.key, EXCLUDED.key),
            camelot_key = COALESCE(silver_tracks.camelot_key, EXCLUDED.camelot_key),
            genre = COALESCE(silver_tracks.genre, EXCLUDED.genre),
            label = COALESCE(silver_tracks.label, EXCLUDED.label),
            isrc = COALESCE(silver_tracks.isrc, EXCLUDED.isrc),
            spotify_id = COALESCE(silver_tracks.spotify_id, EXCLUDED.spotify_id),
            data_quality_score =
                GREATEST(silver_tracks.data_quality_score, EXCLUDED.data_quality_score),
            updated_at = NOW()
        RETURNING track_id, (xmax = 0) AS newly_created
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(bronze_id)
    .bind(title)
    .bind(&normalized.title)
    .bind(artist_name)
    .bind(track.duration_ms)
    .bind(bpm)
    .bind(&track.musical_key)
    .bind(&camelot)
    .bind(&track.genre)
    .bind(&track.record_label)
    .bind(&track.isrc)
    .bind(&track.spotify_id)
    .bind(is_remix)
    .bind(is_mashup)
    .bind(is_live)
    .bind(is_cover)
    .bind(ValidationStatus::from_score(quality).as_str())
    .bind(quality)
    .bind(&metadata)
    .fetch_one(&mut **tx)
    .await?;

    Ok(UpsertedTrack {
        track_id: row.try_get("track_id")?,
        newly_created: row.try_get("newly_created")?,
    })
}

async fn playlist_exists(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT 1 AS present FROM silver_playlists WHERE playlist_id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

async fn resolve_playlist_by_bronze(
    tx: &mut Transaction<'_, Postgres>,
    bronze_id: Uuid,
) -> Result<Option<Uuid>> {
    let row = sqlx::query("SELECT playlist_id FROM silver_playlists WHERE bronze_id = $1")
        .bind(bronze_id)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(|r| r.try_get("playlist_id"))
        .transpose()
        .map_err(Into::into)
}

async fn resolve_track_by_bronze(
    tx: &mut Transaction<'_, Postgres>,
    bronze_id: Uuid,
) -> Result<Option<Uuid>> {
    let row = sqlx::query("SELECT track_id FROM silver_tracks WHERE bronze_id = $1")
        .bind(bronze_id)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(|r| r.try_get("track_id"))
        .transpose()
        .map_err(Into::into)
}

/// Resolve a track by normalized title, preferring an exact artist match.
pub async fn resolve_track_by_title(
    tx: &mut Transaction<'_, Postgres>,
    title: &str,
    artist: Option<&str>,
) -> Result<Option<Uuid>> {
    let normalized = normalize_title_only(title, true).title;
    if normalized.is_empty() {
        return Ok(None);
    }

    if let Some(artist) = artist.filter(|a| !a.trim().is_empty()) {
        let row = sqlx::query(
            r#"
            SELECT track_id FROM silver_tracks
            WHERE normalized_title = $1 AND LOWER(artist_name) = LOWER($2)
            LIMIT 1
            "#,
        )
        .bind(&normalized)
        .bind(artist)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(row) = row {
            return Ok(Some(row.try_get("track_id")?));
        }
    }

    let row = sqlx::query(
        r#"
        SELECT track_id FROM silver_tracks
        WHERE normalized_title = $1
        ORDER BY data_quality_score DESC
        LIMIT 1
        "#,
    )
    .bind(&normalized)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(|r| r.try_get("track_id"))
        .transpose()
        .map_err(Into::into)
}

/// Recursive parse of JSON strings nested inside a JSON payload.
///
/// Upstream stores sometimes double-encode: a `metadata` field arrives as a
/// string containing JSON. Any string that parses as an object or array is
/// replaced by its parsed form, recursively.
pub fn parse_nested_json(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, parse_nested_json(v)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(parse_nested_json).collect())
        }
        Value::String(s) => {
            let trimmed = s.trim();
            let looks_nested = (trimmed.starts_with('{') && trimmed.ends_with('}'))
                || (trimmed.starts_with('[') && trimmed.ends_with(']'));
            if looks_nested {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed) => parse_nested_json(parsed),
                    Err(_) => Value::String(s),
                }
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// Field-completeness quality score in [0, 1].
///
/// Required fields contribute 0.2 each, high-value optionals 0.1 each,
/// medium optionals 0.067 each, capped at 1.0.
pub fn track_quality_score(track: &TrackBronze) -> f64 {
    let mut score: f64 = 0.0;
    if !track.artist_name.trim().is_empty() {
        score += 0.2;
    }
    if !track.track_name.trim().is_empty() {
        score += 0.2;
    }

    let high_value = [
        track.bpm.map(|b| b.to_string()),
        track.musical_key.clone(),
        track.genre.clone(),
        track.record_label.clone(),
    ];
    for field in high_value.iter() {
        if field.as_deref().map_or(false, |v| !v.trim().is_empty()) {
            score += 0.1;
        }
    }

    if track.is_remix.is_some() {
        score += 0.067;
    }
    if track.remix_type.as_deref().map_or(false, |v| !v.is_empty()) {
        score += 0.067;
    }
    if track.track_type.as_deref().map_or(false, |v| !v.is_empty()) {
        score += 0.067;
    }

    score.min(1.0)
}

fn playlist_quality_score(playlist: &PlaylistBronze) -> f64 {
    let mut score: f64 = 0.0;
    if !playlist.name.trim().is_empty() {
        score += 0.4;
    }
    if playlist
        .dj_artist_name
        .as_deref()
        .map_or(false, |v| !v.trim().is_empty())
    {
        score += 0.2;
    }
    if playlist.event_date.is_some() {
        score += 0.2;
    }
    if playlist.venue.is_some() {
        score += 0.1;
    }
    if playlist.track_count.unwrap_or(0) > 0 {
        score += 0.1;
    }
    score.min(1.0)
}

/// Tolerant event-date parsing: plain `YYYY-MM-DD` or ISO datetime.
pub fn parse_event_date_tolerant(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(datetime.date_naive());
    }
    if let Ok(datetime) =
        chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
    {
        return Some(datetime.date());
    }
    None
}

/// Mashups are flagged by a " vs " joiner in the title.
pub fn detect_mashup(title: &str) -> bool {
    let lower = title.to_lowercase();
    lower.contains(" vs ") || lower.contains(" vs. ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quality_score_required_only() {
        let track = TrackBronze {
            artist_name: "FISHER".to_string(),
            track_name: "Losing It".to_string(),
            ..Default::default()
        };
        assert!((track_quality_score(&track) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_quality_score_full_record_caps_at_one() {
        let track = TrackBronze {
            artist_name: "FISHER".to_string(),
            track_name: "Losing It".to_string(),
            bpm: Some(125.0),
            musical_key: Some("A minor".to_string()),
            genre: Some("tech house".to_string()),
            record_label: Some("Catch & Release".to_string()),
            is_remix: Some(false),
            remix_type: Some("original".to_string()),
            track_type: Some("studio".to_string()),
            ..Default::default()
        };
        let score = track_quality_score(&track);
        assert!(score <= 1.0);
        assert!(score > 0.99);
    }

    #[test]
    fn test_quality_score_thresholds_map_to_status() {
        let mut track = TrackBronze {
            artist_name: "A".to_string(),
            track_name: "T".to_string(),
            bpm: Some(128.0),
            musical_key: Some("Am".to_string()),
            genre: Some("house".to_string()),
            ..Default::default()
        };
        // 0.2 + 0.2 + 0.1*3 = 0.7 -> valid
        assert_eq!(
            ValidationStatus::from_score(track_quality_score(&track)),
            ValidationStatus::Valid
        );
        track.bpm = None;
        track.musical_key = None;
        track.genre = None;
        // 0.4 -> warning
        assert_eq!(
            ValidationStatus::from_score(track_quality_score(&track)),
            ValidationStatus::Warning
        );
    }

    #[test]
    fn test_nested_json_parsing() {
        let raw = json!({
            "artist_name": "FISHER",
            "metadata": "{\"label\": \"Catch & Release\", \"tags\": \"[1, 2]\"}",
            "plain": "not json {",
        });
        let parsed = parse_nested_json(raw);
        assert_eq!(parsed["metadata"]["label"], "Catch & Release");
        assert_eq!(parsed["metadata"]["tags"][0], 1);
        assert_eq!(parsed["plain"], "not json {");
    }

    #[test]
    fn test_nested_json_invalid_stays_string() {
        let raw = json!({"broken": "{not valid json}"});
        let parsed = parse_nested_json(raw);
        assert_eq!(parsed["broken"], "{not valid json}");
    }

    #[test]
    fn test_event_date_parsing() {
        assert_eq!(
            parse_event_date_tolerant("2024-06-01"),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(
            parse_event_date_tolerant("2024-06-01T22:30:00Z"),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(
            parse_event_date_tolerant("2024-06-01T22:30:00"),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(parse_event_date_tolerant("June 1st"), None);
    }

    #[test]
    fn test_mashup_detection() {
        assert!(detect_mashup("Take Off vs Night Train"));
        assert!(detect_mashup("Take Off vs. Night Train [Woofer]"));
        assert!(!detect_mashup("Losing It (Remix)"));
        assert!(!detect_mashup("Versus"));
    }
}
