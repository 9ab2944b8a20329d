//! Durable at-least-once queue backed by the shared database. Claims are
//! guarded by a state-transition check so two workers can poll the same
//! table; a claim that loses the race simply tries the next row.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use super::jobs::{Job, JobPayload};

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_after(delay: Duration) -> String {
    (Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()))
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
    backoff_base: Duration,
}

impl JobStore {
    pub fn new(pool: SqlitePool, backoff_base: Duration) -> Self {
        JobStore { pool, backoff_base }
    }

    pub async fn enqueue(&self, payload: &JobPayload, max_attempts: i64) -> Result<i64> {
        let body = serde_json::to_string(payload).context("serializing job payload")?;
        let now = now_string();
        let id: i64 = sqlx::query(
            "INSERT INTO lsif_jobs (kind, payload, state, attempts, max_attempts, run_after, created_at) \
             VALUES (?, ?, 'queued', 0, ?, ?, ?) RETURNING id",
        )
        .bind(payload.kind())
        .bind(&body)
        .bind(max_attempts)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        debug!(kind = payload.kind(), job_id = id, "enqueued job");
        Ok(id)
    }

    /// Enqueue unless a job of the same kind is already queued or
    /// processing. Returns `None` when the existing instance made this one
    /// redundant.
    pub async fn enqueue_singleton(
        &self,
        payload: &JobPayload,
        max_attempts: i64,
    ) -> Result<Option<i64>> {
        let body = serde_json::to_string(payload).context("serializing job payload")?;
        let now = now_string();
        let row = sqlx::query(
            "INSERT INTO lsif_jobs (kind, payload, state, attempts, max_attempts, run_after, created_at) \
             SELECT ?, ?, 'queued', 0, ?, ?, ? \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM lsif_jobs WHERE kind = ? AND state IN ('queued', 'processing') \
             ) RETURNING id",
        )
        .bind(payload.kind())
        .bind(&body)
        .bind(max_attempts)
        .bind(&now)
        .bind(&now)
        .bind(payload.kind())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get("id").map_err(Into::into)).transpose()
    }

    /// Claim the oldest runnable job, marking it `processing` and counting
    /// the attempt. Returns `None` when the queue is drained.
    pub async fn claim(&self) -> Result<Option<Job>> {
        loop {
            let now = now_string();
            let Some(row) = sqlx::query(
                "SELECT id, payload, attempts, max_attempts FROM lsif_jobs \
                 WHERE state = 'queued' AND run_after <= ? ORDER BY id LIMIT 1",
            )
            .bind(&now)
            .fetch_optional(&self.pool)
            .await?
            else {
                return Ok(None);
            };

            let id: i64 = row.try_get("id")?;
            let claimed = sqlx::query(
                "UPDATE lsif_jobs SET state = 'processing', attempts = attempts + 1, started_at = ? \
                 WHERE id = ? AND state = 'queued'",
            )
            .bind(now_string())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

            // Lost the race to another worker; try the next row.
            if claimed == 0 {
                continue;
            }

            let payload_text: String = row.try_get("payload")?;
            let payload: JobPayload =
                serde_json::from_str(&payload_text).context("deserializing job payload")?;
            return Ok(Some(Job {
                id,
                payload,
                attempts: row.try_get::<i64, _>("attempts")? + 1,
                max_attempts: row.try_get("max_attempts")?,
            }));
        }
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE lsif_jobs SET state = 'completed', finished_at = ? WHERE id = ?")
            .bind(now_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failure. Retryable failures re-queue with exponential
    /// backoff plus jitter; terminal failures and exhausted attempts land
    /// in `errored`, keeping the message for operator inspection.
    pub async fn fail(&self, job: &Job, error: &str, terminal: bool) -> Result<()> {
        if terminal || job.attempts >= job.max_attempts {
            warn!(job_id = job.id, attempts = job.attempts, error, "job failed permanently");
            sqlx::query(
                "UPDATE lsif_jobs SET state = 'errored', last_error = ?, finished_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(now_string())
            .bind(job.id)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let exponent = (job.attempts - 1).clamp(0, 16) as u32;
        let base = self.backoff_base * 2u32.saturating_pow(exponent);
        let jitter = Duration::from_millis(
            rand::thread_rng().gen_range(0..=self.backoff_base.as_millis().max(1) as u64),
        );
        let run_after = timestamp_after(base + jitter);

        warn!(
            job_id = job.id,
            attempts = job.attempts,
            ?base,
            error,
            "job failed, retrying"
        );
        sqlx::query(
            "UPDATE lsif_jobs SET state = 'queued', last_error = ?, run_after = ? WHERE id = ?",
        )
        .bind(error)
        .bind(&run_after)
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-queue `processing` jobs whose worker died. Run at worker startup.
    pub async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero()))
        .to_rfc3339_opts(SecondsFormat::Micros, true);

        let requeued = sqlx::query(
            "UPDATE lsif_jobs SET state = 'queued', run_after = ? \
             WHERE state = 'processing' AND started_at < ?",
        )
        .bind(now_string())
        .bind(&cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if requeued > 0 {
            warn!(requeued, "requeued stale jobs from a previous worker");
        }
        Ok(requeued)
    }

    pub async fn queued_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM lsif_jobs WHERE state = 'queued'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
