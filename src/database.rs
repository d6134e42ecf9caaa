//! Connection pool construction for Postgres and Redis.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::{DatabaseSettings, RedisSettings};
use crate::error::{PipelineError, Result};

/// Create the bounded Postgres pool. Acquisition carries a timeout so pool
/// exhaustion surfaces as an error instead of a hang.
pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .connect(&settings.url)
        .await?;
    Ok(pool)
}

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PipelineError::Config(format!("migration failed: {}", e)))?;
    Ok(())
}

/// Create the Redis pool used by the work queue and scheduler state.
pub fn create_redis_pool(settings: &RedisSettings) -> Result<deadpool_redis::Pool> {
    let config = deadpool_redis::Config::from_url(&settings.url);
    config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| PipelineError::Redis(e.to_string()))
}

/// Verify both stores answer before a run starts.
pub async fn health_check(pool: &PgPool, redis: &deadpool_redis::Pool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    let mut conn = redis.get().await?;
    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await?;
    Ok(())
}
