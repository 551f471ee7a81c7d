//! Durable job queue (C2): priority- and lease-based dequeue over Postgres,
//! with exponential backoff retries and dead-lettering on retry exhaustion.
//!
//! Dequeue is a `WITH ... FOR UPDATE SKIP LOCKED ... UPDATE ... RETURNING`
//! CTE so concurrent workers never claim the same row. [`Job`] stays flat:
//! no recurrence, workflow, or container fields, since this queue only
//! needs to move a URL through fetch-and-persist once per attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{Job, JobStatus, JobType};
use crate::error::CrawlerError;

/// Outcome of [`JobQueue::enqueue`]: whether a new row was inserted, or an
/// existing job with the same idempotency key (`job_type` + `target_url`)
/// was returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Created(Job),
    Duplicate(Job),
}

const MAX_BACKOFF_SECS: i64 = 3600;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Backoff delay before a job becomes eligible again after `retry_count`
/// prior attempts: `2^retry_count` seconds, capped at one hour.
fn backoff_seconds(retry_count: i32) -> i64 {
    2i64.saturating_pow(retry_count.max(0) as u32).min(MAX_BACKOFF_SECS)
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job_type: JobType,
        target_url: &str,
        priority: i32,
        metadata: Json,
        max_attempts: i32,
    ) -> Result<EnqueueResult, CrawlerError>;

    /// Atomically claim up to `limit` ready jobs for `worker_id`, highest
    /// priority first, oldest `created_at` as the tiebreak.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>, CrawlerError>;

    /// Idempotent: completing an already-completed job is a no-op.
    async fn complete(&self, job_id: Uuid, result: Json) -> Result<(), CrawlerError>;

    /// Record a failed attempt. If `attempts` (after this one) is still
    /// below `max_attempts` the job is rescheduled with exponential backoff;
    /// otherwise it is dead-lettered (`status = failed`, left for operator
    /// inspection).
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), CrawlerError>;

    /// Release a lease without counting it as a failed attempt, for
    /// cooperative shutdown mid-claim.
    async fn release(&self, job_id: Uuid) -> Result<(), CrawlerError>;

    /// Lock hygiene, part one: release every lease currently held by
    /// `worker_id`, regardless of whether it has expired yet. Called once a
    /// worker has drained its in-flight work and is about to exit, so its
    /// locks don't linger at the full lease TTL after it has already
    /// stopped processing. Returns the number of jobs released.
    async fn release_by_worker(&self, worker_id: &str) -> Result<u64, CrawlerError>;

    /// Lock hygiene, part two: reset any `running` job whose lease has
    /// expired back to `queued`, independent of the inline reclaim
    /// `claim` already performs. Meant to be run on a periodic sweep so a
    /// stuck lease becomes visible even while no worker is actively
    /// claiming. Returns the number of jobs swept.
    async fn sweep_expired_leases(&self) -> Result<u64, CrawlerError>;
}

pub struct PostgresJobQueue {
    pool: PgPool,
    /// Leases older than this are treated as abandoned and become
    /// reclaimable even if `locked_by` is still set.
    lease_duration_secs: i64,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_duration_secs: 300,
        }
    }

    pub fn with_lease_duration(mut self, secs: i64) -> Self {
        self.lease_duration_secs = secs;
        self
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(
        &self,
        job_type: JobType,
        target_url: &str,
        priority: i32,
        metadata: Json,
        max_attempts: i32,
    ) -> Result<EnqueueResult, CrawlerError> {
        let priority = Job::clamp_priority(priority);

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, target_url, priority, status, attempts, max_attempts, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6, NOW(), NOW())
            ON CONFLICT (job_type, target_url) WHERE status IN ('queued', 'running')
            DO NOTHING
            RETURNING id, job_type, target_url, priority, status, attempts, max_attempts,
                      locked_at, locked_by, last_error, metadata, created_at, updated_at, completed_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(job_type.as_str())
        .bind(target_url)
        .bind(priority)
        .bind(max_attempts)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("enqueue", e))?;

        match row {
            Some(row) => Ok(EnqueueResult::Created(row_to_job(row)?)),
            None => {
                // A non-terminal job already exists for this (type, url): bump its
                // priority to the max of the two rather than duplicating it.
                let existing = sqlx::query(
                    r#"
                    UPDATE jobs
                    SET priority = GREATEST(priority, $3), updated_at = NOW()
                    WHERE job_type = $1 AND target_url = $2 AND status IN ('queued', 'running')
                    RETURNING id, job_type, target_url, priority, status, attempts, max_attempts,
                              locked_at, locked_by, last_error, metadata, created_at, updated_at, completed_at
                    "#,
                )
                .bind(job_type.as_str())
                .bind(target_url)
                .bind(priority)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| CrawlerError::database("enqueue.lookup_duplicate", e))?;

                Ok(EnqueueResult::Duplicate(row_to_job(existing)?))
            }
        }
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>, CrawlerError> {
        let rows = sqlx::query(
            r#"
            WITH ready AS (
                SELECT id FROM jobs
                WHERE (status = 'queued' AND (locked_at IS NULL OR locked_at <= NOW()))
                   OR (status = 'running' AND locked_at < NOW() - make_interval(secs => $3))
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            UPDATE jobs
            SET status = 'running', locked_at = NOW(), locked_by = $1, updated_at = NOW(), attempts = attempts + 1
            WHERE id IN (SELECT id FROM ready)
            RETURNING id, job_type, target_url, priority, status, attempts, max_attempts,
                      locked_at, locked_by, last_error, metadata, created_at, updated_at, completed_at
            "#,
        )
        .bind(worker_id)
        .bind(limit)
        .bind(self.lease_duration_secs as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("claim", e))?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn complete(&self, job_id: Uuid, result: Json) -> Result<(), CrawlerError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = COALESCE(completed_at, NOW()), updated_at = NOW(),
                locked_at = NULL, locked_by = NULL, metadata = metadata || $2
            WHERE id = $1 AND status != 'completed'
            "#,
        )
        .bind(job_id)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("complete", e))?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), CrawlerError> {
        let row = sqlx::query("SELECT attempts, max_attempts FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CrawlerError::database("fail.lookup", e))?
            .ok_or(CrawlerError::NotFound)?;

        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");

        if attempts >= max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempts = $2, last_error = $3, updated_at = NOW(), locked_at = NULL, locked_by = NULL WHERE id = $1",
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlerError::database("fail.dead_letter", e))?;
        } else {
            let delay = backoff_seconds(attempts);
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'queued', attempts = $2, last_error = $3, updated_at = NOW(),
                    locked_at = NOW() + make_interval(secs => $4), locked_by = NULL
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .bind(delay as f64)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlerError::database("fail.reschedule", e))?;
        }

        Ok(())
    }

    async fn release(&self, job_id: Uuid) -> Result<(), CrawlerError> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', locked_at = NULL, locked_by = NULL, updated_at = NOW() WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("release", e))?;
        Ok(())
    }

    async fn release_by_worker(&self, worker_id: &str) -> Result<u64, CrawlerError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', locked_at = NULL, locked_by = NULL, updated_at = NOW() WHERE locked_by = $1 AND status = 'running'",
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("release_by_worker", e))?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired_leases(&self) -> Result<u64, CrawlerError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE status = 'running' AND locked_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(self.lease_duration_secs as f64)
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlerError::database("sweep_expired_leases", e))?;
        Ok(result.rows_affected())
    }
}

/// Run [`JobQueue::sweep_expired_leases`] on a fixed interval until
/// `shutdown` is cancelled. The dequeue path already reclaims an expired
/// lease inline the moment a worker next claims, but this sweep makes
/// expiry visible even during a lull with no active claimers.
pub async fn run_lease_sweeper(
    queue: std::sync::Arc<dyn JobQueue>,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }

        match queue.sweep_expired_leases().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "swept expired job leases"),
            Err(e) => tracing::warn!(error = %e, "lease sweep failed"),
        }
    }
}

fn row_to_job(row: sqlx::postgres::PgRow) -> Result<Job, CrawlerError> {
    let job_type_str: String = row.get("job_type");
    let status_str: String = row.get("status");

    let job_type = JobType::parse(&job_type_str)
        .ok_or_else(|| CrawlerError::Fatal(format!("unknown job_type in database: {job_type_str}")))?;
    let status = match status_str.as_str() {
        "queued" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        other => return Err(CrawlerError::Fatal(format!("unknown job status in database: {other}"))),
    };

    Ok(Job {
        id: row.get("id"),
        job_type,
        target_url: row.get("target_url"),
        priority: row.get("priority"),
        status,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        locked_at: row.get::<Option<DateTime<Utc>>, _>("locked_at"),
        locked_by: row.get("locked_by"),
        last_error: row.get("last_error"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}
