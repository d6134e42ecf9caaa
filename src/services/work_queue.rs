//! Durable work queue and dispatcher for enrichment/resolution tasks.
//!
//! Tasks are persisted in Redis so restarts resume where they left off. The
//! queue is ordered by `(priority, created_at)` among due tasks; workers
//! pull, execute the enrichment waterfall (or a bare artist resolution),
//! and write the outcome back. Retriable failures are rescheduled at
//! `attempt x base` with jitter; terminal failures land in a dead-letter
//! hash with their error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EnrichmentSettings;
use crate::error::{PipelineError, Result};
use crate::models::EnrichmentState;
use crate::services::artist_resolver::MultiTierArtistResolver;
use crate::services::enrichment::EnrichmentPipeline;

const PENDING_KEY: &str = "work_queue:pending";
const DEAD_LETTER_KEY: &str = "work_queue:dead_letter";

fn task_key(id: Uuid) -> String {
    format!("work_queue:task:{}", id)
}

/// What a queued task asks a worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    EnrichTrack,
    ResolveArtist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// A persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub track_id: Uuid,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

pub struct WorkQueue {
    redis: deadpool_redis::Pool,
}

impl WorkQueue {
    pub fn new(redis: deadpool_redis::Pool) -> Self {
        Self { redis }
    }

    /// Enqueue a task, durable across restarts.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        track_id: Uuid,
        priority: TaskPriority,
        max_attempts: u32,
    ) -> Result<Uuid> {
        let task = QueuedTask {
            id: Uuid::new_v4(),
            kind,
            track_id,
            priority,
            created_at: Utc::now(),
            scheduled_at: Utc::now(),
            attempt: 0,
            max_attempts,
            last_error: None,
        };
        self.save_and_schedule(&task).await?;
        debug!(task_id = %task.id, track_id = %track_id, kind = ?kind, "task enqueued");
        Ok(task.id)
    }

    /// Claim up to `limit` due tasks, highest priority first, FIFO within a
    /// priority level.
    pub async fn claim_due(&self, limit: usize) -> Result<Vec<QueuedTask>> {
        let mut conn = self.redis.get().await?;
        let now = Utc::now().timestamp();
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(PENDING_KEY)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(limit as isize)
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::new();
        for id in ids {
            let removed: i64 = conn.zrem(PENDING_KEY, &id).await?;
            if removed == 0 {
                // Another worker claimed it first.
                continue;
            }
            let json: Option<String> = conn.get(format!("work_queue:task:{}", id)).await?;
            if let Some(json) = json {
                match serde_json::from_str::<QueuedTask>(&json) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!(task_id = %id, error = %e, "undecodable task dropped"),
                }
            }
        }

        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    /// Remove a finished task.
    pub async fn complete(&self, task: &QueuedTask) -> Result<()> {
        let mut conn = self.redis.get().await?;
        let _: i64 = conn.del(task_key(task.id)).await?;
        Ok(())
    }

    /// Reschedule a retriable failure with linear back-off plus jitter, or
    /// dead-letter it once attempts are exhausted.
    pub async fn retry_or_bury(
        &self,
        mut task: QueuedTask,
        error: &str,
        retriable: bool,
        base_delay: Duration,
    ) -> Result<RetryDisposition> {
        task.last_error = Some(error.to_string());
        task.attempt += 1;

        if !retriable || task.attempt >= task.max_attempts {
            self.bury(&task).await?;
            return Ok(RetryDisposition::DeadLettered);
        }

        let delay = backoff_with_jitter(task.attempt, base_delay);
        task.scheduled_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.save_and_schedule(&task).await?;
        warn!(
            task_id = %task.id,
            attempt = task.attempt,
            delay_secs = delay.as_secs(),
            "task rescheduled"
        );
        Ok(RetryDisposition::Rescheduled)
    }

    async fn bury(&self, task: &QueuedTask) -> Result<()> {
        let mut conn = self.redis.get().await?;
        let json = serde_json::to_string(task)
            .map_err(|e| PipelineError::Parse(format!("task encode: {}", e)))?;
        let _: i64 = conn
            .hset(DEAD_LETTER_KEY, task.id.to_string(), json)
            .await?;
        let _: i64 = conn.del(task_key(task.id)).await?;
        error!(
            task_id = %task.id,
            track_id = %task.track_id,
            error = ?task.last_error,
            "task dead-lettered"
        );
        Ok(())
    }

    async fn save_and_schedule(&self, task: &QueuedTask) -> Result<()> {
        let mut conn = self.redis.get().await?;
        let json = serde_json::to_string(task)
            .map_err(|e| PipelineError::Parse(format!("task encode: {}", e)))?;
        let _: () = conn.set(task_key(task.id), json).await?;
        let _: () = conn
            .zadd(PENDING_KEY, task.id.to_string(), task.scheduled_at.timestamp())
            .await?;
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let mut conn = self.redis.get().await?;
        let count: u64 = conn.zcard(PENDING_KEY).await?;
        Ok(count)
    }

    pub async fn dead_letter_count(&self) -> Result<u64> {
        let mut conn = self.redis.get().await?;
        let count: u64 = conn.hlen(DEAD_LETTER_KEY).await?;
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Rescheduled,
    DeadLettered,
}

/// `attempt x base` plus up to half a base of jitter, so synchronized
/// failures do not thunder back in lockstep.
pub fn backoff_with_jitter(attempt: u32, base: Duration) -> Duration {
    let linear = base * attempt.max(1);
    let jitter_ms = if base.as_millis() == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=(base.as_millis() / 2) as u64)
    };
    linear + Duration::from_millis(jitter_ms)
}

/// Bounded worker pool draining the queue into the enrichment pipeline.
pub struct Dispatcher {
    queue: Arc<WorkQueue>,
    pipeline: Arc<EnrichmentPipeline>,
    resolver: Arc<MultiTierArtistResolver>,
    settings: EnrichmentSettings,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<WorkQueue>,
        pipeline: Arc<EnrichmentPipeline>,
        resolver: Arc<MultiTierArtistResolver>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            queue,
            pipeline,
            resolver,
            settings,
        }
    }

    /// Run workers until the shutdown channel fires.
    pub async fn run(self: Arc<Self>, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(workers = self.settings.worker_count, "dispatcher started");
        let mut poll = tokio::time::interval(Duration::from_secs(2));
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("dispatcher shutting down");
                    return Ok(());
                }
                _ = poll.tick() => {
                    let tasks = match self.queue.claim_due(self.settings.worker_count).await {
                        Ok(tasks) => tasks,
                        Err(e) => {
                            error!(error = %e, "queue poll failed");
                            continue;
                        }
                    };
                    let mut handles = Vec::new();
                    for task in tasks {
                        let dispatcher = self.clone();
                        handles.push(tokio::spawn(async move {
                            dispatcher.execute(task).await;
                        }));
                    }
                    for handle in handles {
                        let _ = handle.await;
                    }
                }
            }
        }
    }

    /// Drain everything currently due, then return. Used by the CLI
    /// `run-pipeline` path.
    pub async fn drain(&self) -> Result<u64> {
        let mut processed = 0;
        loop {
            let tasks = self.queue.claim_due(self.settings.worker_count).await?;
            if tasks.is_empty() {
                return Ok(processed);
            }
            for task in tasks {
                self.execute(task).await;
                processed += 1;
            }
        }
    }

    async fn execute(&self, task: QueuedTask) {
        let deadline = self.settings.per_track_deadline;
        let result = tokio::time::timeout(deadline, self.execute_inner(&task)).await;

        let settled: Result<()> = match result {
            Ok(Ok(None)) => self.queue.complete(&task).await,
            Ok(Ok(Some(failure))) => self
                .queue
                .retry_or_bury(task, &failure, true, self.settings.retry_base_delay)
                .await
                .map(|_| ()),
            Ok(Err(e)) => self
                .queue
                .retry_or_bury(
                    task,
                    &e.to_string(),
                    e.is_retriable(),
                    self.settings.retry_base_delay,
                )
                .await
                .map(|_| ()),
            Err(_) => self
                .queue
                .retry_or_bury(
                    task,
                    &format!("deadline of {:?} exceeded", deadline),
                    true,
                    self.settings.retry_base_delay,
                )
                .await
                .map(|_| ()),
        };

        if let Err(e) = settled {
            error!(error = %e, "failed to settle task");
        }
    }

    /// Returns `Ok(Some(error))` when the task completed with a retriable
    /// failure recorded in its status, `Ok(None)` on clean completion.
    async fn execute_inner(&self, task: &QueuedTask) -> Result<Option<String>> {
        match task.kind {
            TaskKind::EnrichTrack => {
                let outcome = self.pipeline.enrich_track(task.track_id).await?;
                if outcome.status == EnrichmentState::Failed && outcome.is_retriable {
                    return Ok(outcome.error_message.or_else(|| {
                        Some("enrichment failed with retriable errors".to_string())
                    }));
                }
                Ok(None)
            }
            TaskKind::ResolveArtist => {
                let title_row = sqlx::query_scalar::<_, String>(
                    "SELECT title FROM silver_tracks WHERE track_id = $1",
                )
                .bind(task.track_id)
                .fetch_optional(self.pool())
                .await?;
                let Some(title) = title_row else {
                    return Err(PipelineError::NotFound {
                        resource: format!("track {}", task.track_id),
                    });
                };
                self.resolver.resolve(task.track_id, &title, None).await?;
                Ok(None)
            }
        }
    }

    fn pool(&self) -> &sqlx::PgPool {
        self.resolver.pool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear_in_attempt() {
        let base = Duration::from_secs(30);
        let first = backoff_with_jitter(1, base);
        assert!(first >= base && first <= base + Duration::from_secs(15));
        let third = backoff_with_jitter(3, base);
        assert!(third >= base * 3 && third <= base * 3 + Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_zero_attempt_treated_as_one() {
        let base = Duration::from_secs(10);
        let delay = backoff_with_jitter(0, base);
        assert!(delay >= base);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn test_task_serialization_round_trip() {
        let task = QueuedTask {
            id: Uuid::new_v4(),
            kind: TaskKind::EnrichTrack,
            track_id: Uuid::new_v4(),
            priority: TaskPriority::Normal,
            created_at: Utc::now(),
            scheduled_at: Utc::now(),
            attempt: 0,
            max_attempts: 3,
            last_error: None,
        };
        let json = serde_json::to_string(&task).unwrap();
        let decoded: QueuedTask = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, task.id);
        assert_eq!(decoded.kind, TaskKind::EnrichTrack);
        assert_eq!(decoded.priority, TaskPriority::Normal);
    }
}
