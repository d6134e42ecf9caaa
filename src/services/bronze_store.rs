//! Append-only bronze persistence.
//!
//! Every raw scrape is stored verbatim in `raw_scrape_data`. Writes are
//! idempotent on a per-type natural key (URL hash for playlists, artist+title
//! for tracks, ...), so re-scraping the same page does not duplicate rows.
//! `raw_data` is never mutated after insert; the transformer flips the
//! `processed` flag inside the same transaction as its silver writes.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{RawScrape, ScrapeType, SourceId};

pub struct BronzeStore {
    pool: PgPool,
}

impl BronzeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert one raw scrape. Returns the new scrape id, or `None` when the
    /// natural key already exists (idempotent replay).
    pub async fn insert(
        &self,
        source: SourceId,
        scrape_type: ScrapeType,
        raw_data: &serde_json::Value,
    ) -> Result<Option<Uuid>> {
        let scrape_id = Uuid::new_v4();
        let key = natural_key(source, scrape_type, raw_data);

        let inserted = sqlx::query(
            r#"
            INSERT INTO raw_scrape_data
                (scrape_id, source, scrape_type, natural_key, raw_data, scraped_at, processed)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE)
            ON CONFLICT (scrape_type, natural_key) DO NOTHING
            "#,
        )
        .bind(scrape_id)
        .bind(source.as_str())
        .bind(scrape_type.as_str())
        .bind(&key)
        .bind(raw_data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(
                source = %source,
                scrape_type = %scrape_type,
                "bronze record already present, skipping"
            );
            return Ok(None);
        }
        Ok(Some(scrape_id))
    }

    /// Insert a batch, returning how many rows were new.
    pub async fn insert_batch(
        &self,
        source: SourceId,
        records: &[(ScrapeType, serde_json::Value)],
    ) -> Result<u64> {
        let mut inserted = 0;
        for (scrape_type, raw_data) in records {
            if self.insert(source, *scrape_type, raw_data).await?.is_some() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Unprocessed rows of one type in `scraped_at ASC` order.
    pub async fn fetch_unprocessed(
        &self,
        scrape_type: ScrapeType,
        limit: i64,
    ) -> Result<Vec<RawScrape>> {
        let rows = sqlx::query(
            r#"
            SELECT scrape_id, source, scrape_type, raw_data, scraped_at, processed, processed_at
            FROM raw_scrape_data
            WHERE processed = FALSE AND scrape_type = $1
            ORDER BY scraped_at ASC
            LIMIT $2
            "#,
        )
        .bind(scrape_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_raw_scrape).collect()
    }

    /// Flag rows processed inside the caller's transaction, so the flag and
    /// the silver writes commit atomically.
    pub async fn mark_processed(
        tx: &mut Transaction<'_, Postgres>,
        scrape_ids: &[Uuid],
    ) -> Result<()> {
        if scrape_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE raw_scrape_data
            SET processed = TRUE, processed_at = $2
            WHERE scrape_id = ANY($1)
            "#,
        )
        .bind(scrape_ids)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn count_unprocessed(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM raw_scrape_data WHERE processed = FALSE")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }
}

fn row_to_raw_scrape(row: sqlx::postgres::PgRow) -> Result<RawScrape> {
    let source: String = row.try_get("source")?;
    let scrape_type: String = row.try_get("scrape_type")?;
    Ok(RawScrape {
        scrape_id: row.try_get("scrape_id")?,
        source: source.parse()?,
        scrape_type: scrape_type.parse()?,
        raw_data: row.try_get("raw_data")?,
        scraped_at: row.try_get("scraped_at")?,
        processed: row.try_get("processed")?,
        processed_at: row.try_get("processed_at")?,
    })
}

/// Natural deduplication key for a bronze record. Playlists key on their URL
/// (falling back to name), tracks on artist+title, relations on the full
/// linking tuple; anything else hashes the whole payload.
pub fn natural_key(
    source: SourceId,
    scrape_type: ScrapeType,
    raw_data: &serde_json::Value,
) -> String {
    let field = |name: &str| {
        raw_data
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_lowercase()
    };
    let int_field = |name: &str| {
        raw_data
            .get(name)
            .and_then(|v| v.as_i64())
            .unwrap_or_default()
    };

    let material = match scrape_type {
        ScrapeType::Playlist => {
            let url = field("source_url");
            if url.is_empty() {
                format!("name:{}", field("name"))
            } else {
                format!("url:{}", url)
            }
        }
        ScrapeType::Track => format!("{}|{}", field("artist_name"), field("track_name")),
        ScrapeType::Artist => field("artist_name"),
        ScrapeType::PlaylistTrack => format!(
            "{}|{}|{}",
            field("playlist_name"),
            int_field("position"),
            field("track_title")
        ),
        ScrapeType::TrackAdjacency => format!(
            "{}|{}|{}",
            field("track_a_title"),
            field("track_b_title"),
            field("playlist_name")
        ),
        ScrapeType::TrackArtist => format!(
            "{}|{}|{}",
            field("track_title"),
            field("artist_name"),
            field("role")
        ),
    };

    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(scrape_type.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(material.as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
