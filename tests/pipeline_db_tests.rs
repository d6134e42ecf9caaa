//! End-to-end pipeline tests against a live Postgres.
//!
//! These run against the database pointed to by `DATABASE_URL` and are
//! ignored by default:
//!
//! ```sh
//! DATABASE_URL=postgres://... cargo test --test pipeline_db_tests -- --ignored
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use music_metadata_pipeline::database;
use music_metadata_pipeline::error::Result;
use music_metadata_pipeline::models::{ScrapeType, SourceId};
use music_metadata_pipeline::services::artist_resolver::{
    CommunityLookup, CommunityTrackHit, MultiTierArtistResolver, ResolutionSource,
};
use music_metadata_pipeline::services::bronze_store::BronzeStore;
use music_metadata_pipeline::services::observability::ObservabilityTracker;
use music_metadata_pipeline::services::transformer::Transformer;
use serde_json::json;
use serial_test::serial;
use sqlx::{PgPool, Row};
use uuid::Uuid;

async fn test_pool() -> PgPool {
    let settings = music_metadata_pipeline::config::DatabaseSettings::from_env();
    let pool = database::create_pool(&settings)
        .await
        .expect("DATABASE_URL must point at a reachable Postgres");
    database::run_migrations(&pool).await.expect("migrations");
    reset(&pool).await;
    pool
}

async fn reset(pool: &PgPool) {
    for table in [
        "silver_track_transitions",
        "silver_playlist_tracks",
        "silver_track_artists",
        "enrichment_status",
        "silver_playlists",
        "silver_tracks",
        "silver_artists",
        "raw_scrape_data",
        "scraping_runs",
        "graph_validation_results",
        "anomaly_detection",
        "pipeline_execution_metrics",
        "data_quality_metrics",
        "source_extraction_log",
    ] {
        sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
            .execute(pool)
            .await
            .unwrap();
    }
}

async fn seed_track(bronze: &BronzeStore, artist: &str, title: &str) {
    bronze
        .insert(
            SourceId::Tracklists1001,
            ScrapeType::Track,
            &json!({"artist_name": artist, "track_name": title}),
        )
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a provisioned Postgres (DATABASE_URL)"]
async fn transformer_is_idempotent_over_processed_bronze() {
    let pool = test_pool().await;
    let bronze = BronzeStore::new(pool.clone());
    seed_track(&bronze, "FISHER", "Losing It").await;
    seed_track(&bronze, "Dom Dolla", "Take It").await;

    let transformer = Transformer::new(pool.clone(), false);
    let first = transformer.run(100).await.unwrap();
    assert_eq!(first.tracks_created, 2);
    assert_eq!(first.bronze_records_processed, 2);
    assert_eq!(first.errors, 0);

    // Second pass over the already-processed set is a no-op.
    let second = transformer.run(100).await.unwrap();
    assert_eq!(second.tracks_created, 0);
    assert_eq!(second.bronze_records_processed, 0);

    // Every processed bronze row is referenced by a silver row.
    let orphaned: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM raw_scrape_data r
        WHERE r.processed = TRUE
          AND r.scrape_type = 'track'
          AND NOT EXISTS (
            SELECT 1 FROM silver_tracks t WHERE t.bronze_id = r.scrape_id
          )
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(orphaned, 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires a provisioned Postgres (DATABASE_URL)"]
async fn malformed_bronze_stays_unprocessed_and_invalid_is_skipped() {
    let pool = test_pool().await;
    let bronze = BronzeStore::new(pool.clone());

    // Unknown top-level field: an adapter bug, kept for retry.
    bronze
        .insert(
            SourceId::Mixesdb,
            ScrapeType::Track,
            &json!({"artist_name": "A", "track_name": "T", "bogus_field": 1}),
        )
        .await
        .unwrap();
    // Missing required fields: skipped but processed.
    bronze
        .insert(
            SourceId::Mixesdb,
            ScrapeType::Track,
            &json!({"artist_name": "", "track_name": ""}),
        )
        .await
        .unwrap();

    let transformer = Transformer::new(pool.clone(), false);
    let stats = transformer.run(100).await.unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.skipped_invalid, 1);
    assert_eq!(stats.tracks_created, 0);

    let unprocessed = bronze.count_unprocessed().await.unwrap();
    assert_eq!(unprocessed, 1, "the malformed row must remain retriable");
}

#[tokio::test]
#[serial]
#[ignore = "requires a provisioned Postgres (DATABASE_URL)"]
async fn playlist_graph_invariant_with_same_artist_suppression() {
    let pool = test_pool().await;
    let bronze = BronzeStore::new(pool.clone());

    // Playlist of four tracks: X, X, Y, Z.
    for (artist, title) in [
        ("Artist X", "T1"),
        ("Artist X", "T2"),
        ("Artist Y", "T3"),
        ("Artist Z", "T4"),
    ] {
        seed_track(&bronze, artist, title).await;
    }
    bronze
        .insert(
            SourceId::Tracklists1001,
            ScrapeType::Playlist,
            &json!({"name": "Test Set", "source_url": "https://example.com/set"}),
        )
        .await
        .unwrap();
    for (position, (artist, title)) in [
        ("Artist X", "T1"),
        ("Artist X", "T2"),
        ("Artist Y", "T3"),
        ("Artist Z", "T4"),
    ]
    .iter()
    .enumerate()
    {
        bronze
            .insert(
                SourceId::Tracklists1001,
                ScrapeType::PlaylistTrack,
                &json!({
                    "playlist_name": "Test Set",
                    "track_title": title,
                    "artist_name": artist,
                    "position": position as i32,
                }),
            )
            .await
            .unwrap();
    }

    let transformer = Transformer::new(pool.clone(), false);
    let stats = transformer.run(100).await.unwrap();
    assert_eq!(stats.playlist_tracks_created, 4);
    // (T1,T2) is a same-artist pair and suppressed; (T2,T3) and (T3,T4)
    // become edges.
    assert_eq!(stats.track_transitions_created, 2);

    let playlist_id = music_metadata_pipeline::models::Playlist::stable_id(
        "Test Set",
        SourceId::Tracklists1001,
    );
    let observability = ObservabilityTracker::new(pool.clone());
    let run = observability.start_run("validation").await.unwrap();
    let validation = observability
        .validate_playlist_graph(run.run_id, playlist_id)
        .await
        .unwrap();
    assert_eq!(validation.expected_nodes, 4);
    assert_eq!(validation.expected_edges, 2);
    assert_eq!(validation.actual_edges, 2);
    assert!(validation.passed, "{}", validation.message);

    // Transition rows are canonically ordered with no self-loops.
    let rows = sqlx::query("SELECT track_a_id, track_b_id FROM silver_track_transitions")
        .fetch_all(&pool)
        .await
        .unwrap();
    for row in rows {
        let a: Uuid = row.try_get("track_a_id").unwrap();
        let b: Uuid = row.try_get("track_b_id").unwrap();
        assert!(a < b);
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires a provisioned Postgres (DATABASE_URL)"]
async fn mashup_resolution_from_internal_components() {
    let pool = test_pool().await;
    let bronze = BronzeStore::new(pool.clone());

    // Internal DB knows both components with their artists.
    for (artist, title) in [("A", "Take Off"), ("B", "Night Train")] {
        bronze
            .insert(
                SourceId::Tracklists1001,
                ScrapeType::TrackArtist,
                &json!({"track_title": title, "artist_name": artist, "role": "primary"}),
            )
            .await
            .unwrap();
    }
    // The unknown-artist mashup itself.
    seed_track(&bronze, "Unknown", "Take Off vs Night Train [Woofer]").await;

    let transformer = Transformer::new(pool.clone(), false);
    transformer.run(100).await.unwrap();

    let mashup_id: Uuid = sqlx::query_scalar(
        "SELECT track_id FROM silver_tracks WHERE artist_name = 'Unknown'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let resolver = MultiTierArtistResolver::new(pool.clone());
    let resolution = resolver
        .resolve(mashup_id, "Take Off vs Night Train [Woofer]", None)
        .await
        .unwrap()
        .expect("mashup should resolve internally");

    assert_eq!(resolution.source, ResolutionSource::InternalMashup);
    assert_eq!(resolution.confidence, 0.9);
    assert_eq!(resolution.label.as_deref(), Some("Woofer"));
    let mut artists = resolution.artist_names.clone();
    artists.sort();
    assert_eq!(artists, vec!["A", "B"]);
}

/// Scripted 1001Tracklists stand-in for the feedback-loop scenario.
struct Scripted1001Tl {
    artist: &'static str,
    hits: usize,
}

#[async_trait]
impl CommunityLookup for Scripted1001Tl {
    async fn search_track(&self, _query: &str) -> Result<Vec<CommunityTrackHit>> {
        Ok((0..self.hits)
            .map(|_| CommunityTrackHit {
                artist: Some(self.artist.to_string()),
                title: Some("Your Mind".to_string()),
            })
            .collect())
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires a provisioned Postgres (DATABASE_URL)"]
async fn feedback_loop_turns_external_facts_into_internal_knowledge() {
    let pool = test_pool().await;
    let bronze = BronzeStore::new(pool.clone());

    seed_track(&bronze, "Unknown", "Your Mind [Drumcode]").await;
    seed_track(&bronze, "Unknown", "Darker Times [Drumcode]").await;
    let transformer = Transformer::new(pool.clone(), false);
    transformer.run(100).await.unwrap();

    let first_id: Uuid = sqlx::query_scalar(
        "SELECT track_id FROM silver_tracks WHERE title = 'Your Mind [Drumcode]'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let second_id: Uuid = sqlx::query_scalar(
        "SELECT track_id FROM silver_tracks WHERE title = 'Darker Times [Drumcode]'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let resolver = MultiTierArtistResolver::new(pool.clone()).with_tracklists_1001(Arc::new(
        Scripted1001Tl {
            artist: "Adam Beyer",
            hits: 9,
        },
    ));

    // No Drumcode artists internally yet: Tier 1 misses, Tier 2 resolves.
    let first = resolver
        .resolve(first_id, "Your Mind [Drumcode]", None)
        .await
        .unwrap()
        .expect("external resolution");
    assert_eq!(first.source, ResolutionSource::External1001Tracklists);
    assert!((first.confidence - 0.9).abs() < 1e-9);

    // Seed one more Adam Beyer track so the label reaches the map's
    // two-track floor, mirroring continued ingestion.
    let extra_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO silver_tracks
            (track_id, title, normalized_title, artist_name, label,
             validation_status, data_quality_score)
        VALUES ($1, 'Darker Times', 'darker times', 'Adam Beyer', 'Drumcode', 'valid', 0.8)
        RETURNING track_id
        "#,
    )
    .bind(Uuid::new_v4())
    .fetch_one(&pool)
    .await
    .unwrap();
    let artist_id: Uuid =
        sqlx::query_scalar("SELECT artist_id FROM silver_artists WHERE canonical_name = 'Adam Beyer'")
            .fetch_one(&pool)
            .await
            .unwrap();
    sqlx::query(
        "INSERT INTO silver_track_artists (track_id, artist_id, role) VALUES ($1, $2, 'primary')",
    )
    .bind(extra_id)
    .bind(artist_id)
    .execute(&pool)
    .await
    .unwrap();

    // The first resolution set the track's label and invalidated the map;
    // a later Unknown track on the same label now resolves internally.
    let second = resolver
        .resolve(second_id, "Darker Times [Drumcode]", None)
        .await
        .unwrap()
        .expect("internal resolution after feedback");
    assert_eq!(second.source, ResolutionSource::InternalLabelMap);
    assert!(second.confidence >= 0.7, "confidence {}", second.confidence);
    assert_eq!(second.artist_names, vec!["Adam Beyer"]);
}
