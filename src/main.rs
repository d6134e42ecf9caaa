//! Pipeline control CLI.
//!
//! Exit codes: 0 success, 1 error, 130 interrupted.

use clap::{Parser, Subcommand};
use sqlx::Row;
use tracing::{error, info, warn};
use uuid::Uuid;

use music_metadata_pipeline::config::SeedMatchMode;
use music_metadata_pipeline::models::SourceId;
use music_metadata_pipeline::services::{TaskKind, TaskPriority, Transformer};
use music_metadata_pipeline::{AppConfig, PipelineContext, Result};

#[derive(Parser)]
#[command(name = "pipeline", about = "Music metadata ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape overdue sources, transform pending bronze, enqueue enrichment
    /// for matching tracks, and drain the work queue.
    RunPipeline {
        /// Bypass the per-source interval gate: scrape every enabled source
        /// now, not only the overdue ones.
        #[arg(long)]
        force_rescrape: bool,
        /// Clear the per-source last-run markers before the scrape pass.
        #[arg(long)]
        clear_last_searched: bool,
        /// Limit to a single track id.
        #[arg(long, conflicts_with_all = ["artist", "title"])]
        track_id: Option<Uuid>,
        /// Limit to tracks by this artist (requires --title).
        #[arg(long, requires = "title")]
        artist: Option<String>,
        /// Limit to tracks with this title (requires --artist).
        #[arg(long, requires = "artist")]
        title: Option<String>,
        /// Maximum number of tracks to enqueue.
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Run one bronze-to-silver transformation pass.
    TransformBronze {
        #[arg(long)]
        limit: Option<i64>,
        /// Validate and count without writing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the enrichment waterfall for one track.
    EnrichTrack { track_id: Uuid },
    /// Run multi-tier artist resolution for one track.
    ResolveArtist { track_id: Uuid },
    /// Run the recurring scrape scheduler until interrupted: overdue
    /// sources first, then each source on its adaptive interval.
    RunScheduler,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let exit_code = tokio::select! {
        result = run(cli) => match result {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "command failed");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            130
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(
                std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            )
        })
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env()?;
    match cli.command {
        Command::RunPipeline {
            force_rescrape,
            clear_last_searched,
            track_id,
            artist,
            title,
            limit,
        } => {
            let context = PipelineContext::initialize(config).await?;
            run_pipeline(
                &context,
                force_rescrape,
                clear_last_searched,
                track_id,
                artist.as_deref(),
                title.as_deref(),
                limit,
            )
            .await
        }
        Command::TransformBronze { limit, dry_run } => {
            let pool =
                music_metadata_pipeline::database::create_pool(&config.database).await?;
            let transformer = Transformer::new(pool, dry_run);
            let stats = transformer.run(limit.unwrap_or(1_000)).await?;
            info!(?stats, "transform-bronze finished");
            Ok(())
        }
        Command::EnrichTrack { track_id } => {
            let context = PipelineContext::initialize(config).await?;
            let outcome = context.enrichment.enrich_track(track_id).await?;
            info!(
                track_id = %track_id,
                status = %outcome.status,
                confidence = outcome.confidence_score,
                tier = outcome.confidence_tier.as_str(),
                sources = ?outcome.sources_enriched,
                "enrichment complete"
            );
            Ok(())
        }
        Command::ResolveArtist { track_id } => {
            let context = PipelineContext::initialize(config).await?;
            let title = sqlx::query_scalar::<_, String>(
                "SELECT title FROM silver_tracks WHERE track_id = $1",
            )
            .bind(track_id)
            .fetch_optional(&context.db_pool)
            .await?
            .ok_or_else(|| music_metadata_pipeline::PipelineError::NotFound {
                resource: format!("track {}", track_id),
            })?;

            match context.resolver.resolve(track_id, &title, None).await? {
                Some(resolution) => {
                    info!(
                        artists = ?resolution.artist_names,
                        source = resolution.source.as_str(),
                        confidence = resolution.confidence,
                        "artist resolved"
                    );
                }
                None => info!(track_id = %track_id, "no resolution found"),
            }
            Ok(())
        }
        Command::RunScheduler => {
            let context = PipelineContext::initialize(config).await?;
            if context.adapters.sources().is_empty() {
                return Err(music_metadata_pipeline::PipelineError::Config(
                    "no source adapters registered; nothing to schedule".to_string(),
                ));
            }
            context.scheduler().run_forever().await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    context: &PipelineContext,
    force_rescrape: bool,
    clear_last_searched: bool,
    track_id: Option<Uuid>,
    artist: Option<&str>,
    title: Option<&str>,
    limit: Option<i64>,
) -> Result<()> {
    if clear_last_searched {
        clear_scheduler_state(context).await?;
    }

    run_scrape_pass(context, force_rescrape).await?;

    // Fold the fresh (and any pending) bronze into silver so it is
    // enrichable in the same invocation.
    let transformer = Transformer::new(context.db_pool.clone(), false);
    let stats = transformer.run(limit.unwrap_or(1_000)).await?;
    info!(?stats, "bronze transformation pass finished");

    let track_ids = select_tracks(context, track_id, artist, title, limit).await?;
    info!(count = track_ids.len(), "enqueueing enrichment tasks");
    for id in &track_ids {
        context
            .queue
            .enqueue(
                TaskKind::EnrichTrack,
                *id,
                TaskPriority::Normal,
                context.config.enrichment.max_retries,
            )
            .await?;
    }

    let processed = context.dispatcher.drain().await?;
    info!(processed = processed, "pipeline run complete");
    Ok(())
}

/// One scrape pass: run the overdue sources (every enabled source when the
/// interval gate is bypassed) through the scheduler in parallel. Site
/// adapters are registered by the embedding binary; with none registered
/// the pass is skipped and the run starts from the bronze already on hand.
async fn run_scrape_pass(context: &PipelineContext, force_rescrape: bool) -> Result<()> {
    let registered = context.adapters.sources();
    if registered.is_empty() {
        info!("no source adapters registered, skipping scrape pass");
        return Ok(());
    }

    let scheduler = context.scheduler();
    let due: Vec<SourceId> = if force_rescrape {
        context
            .config
            .sources
            .enabled_scraping_sources()
            .iter()
            .map(|config| config.source)
            .collect()
    } else {
        scheduler.overdue_sources().await?
    };
    let runnable: Vec<SourceId> = due
        .into_iter()
        .filter(|source| registered.contains(source))
        .collect();
    if runnable.is_empty() {
        info!(force_rescrape = force_rescrape, "no sources due for scraping");
        return Ok(());
    }

    info!(sources = ?runnable, force_rescrape = force_rescrape, "running scrape pass");
    let mut handles = Vec::new();
    for source in runnable {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            (source, scheduler.run_source(source).await)
        }));
    }
    for handle in handles {
        if let Ok((source, result)) = handle.await {
            match result {
                Ok(run) => info!(
                    source = %source,
                    playlists = run.playlists_found,
                    tracks = run.tracks_added,
                    errors = run.errors_count,
                    "scrape run finished"
                ),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => warn!(source = %source, error = %e, "scrape run failed"),
            }
        }
    }
    Ok(())
}

async fn select_tracks(
    context: &PipelineContext,
    track_id: Option<Uuid>,
    artist: Option<&str>,
    title: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<Uuid>> {
    if let Some(id) = track_id {
        return Ok(vec![id]);
    }

    let limit = limit.unwrap_or(100);
    let rows = if let (Some(artist), Some(title)) = (artist, title) {
        match context.config.seed_match_mode {
            SeedMatchMode::Exact => {
                sqlx::query(
                    r#"
                    SELECT track_id FROM silver_tracks
                    WHERE artist_name = $1 AND title = $2
                    ORDER BY updated_at ASC
                    LIMIT $3
                    "#,
                )
                .bind(artist)
                .bind(title)
                .bind(limit)
                .fetch_all(&context.db_pool)
                .await?
            }
            SeedMatchMode::Ilike => {
                sqlx::query(
                    r#"
                    SELECT track_id FROM silver_tracks
                    WHERE artist_name ILIKE '%' || $1 || '%'
                      AND title ILIKE '%' || $2 || '%'
                    ORDER BY updated_at ASC
                    LIMIT $3
                    "#,
                )
                .bind(artist)
                .bind(title)
                .bind(limit)
                .fetch_all(&context.db_pool)
                .await?
            }
        }
    } else {
        sqlx::query(
            r#"
            SELECT t.track_id FROM silver_tracks t
            LEFT JOIN enrichment_status es ON es.track_id = t.track_id
            WHERE es.track_id IS NULL
               OR (es.status <> 'completed' AND es.is_retriable = TRUE)
            ORDER BY t.updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&context.db_pool)
        .await?
    };

    rows.into_iter()
        .map(|row| row.try_get("track_id").map_err(Into::into))
        .collect()
}

async fn clear_scheduler_state(context: &PipelineContext) -> Result<()> {
    let mut conn = context.redis_pool.get().await?;
    for source in SourceId::ALL {
        let _: i64 = redis::AsyncCommands::del(
            &mut conn,
            format!("scheduler:last_run:{}", source),
        )
        .await?;
    }
    info!("scheduler last-run markers cleared");
    Ok(())
}
