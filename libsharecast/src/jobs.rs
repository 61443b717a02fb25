//! Durable job queue
//!
//! Jobs are typed descriptors serialized into the `jobs` table. Execution is
//! at-least-once: a reserved job whose worker disappears becomes claimable
//! again after the reservation timeout, so handlers must be idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::db::{decode_json, encode_json};
use crate::error::{DbError, Result};
use crate::Database;

/// Publish one share; the account name only feeds the description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishShareJob {
    pub share_id: i64,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    PublishShare(PublishShareJob),
}

impl Job {
    pub fn publish_share(share_id: i64, account_name: impl Into<String>) -> Self {
        Job::PublishShare(PublishShareJob {
            share_id,
            account_name: account_name.into(),
        })
    }

    /// Human-readable label shown in queue listings
    pub fn description(&self) -> String {
        match self {
            Job::PublishShare(job) => format!("Posting to {}", job.account_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Reserved,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Reserved => "reserved",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// A job handed to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub id: i64,
    pub job: Job,
    /// Including the current attempt
    pub attempts: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub reserved: i64,
    pub done: i64,
    pub failed: i64,
}

/// Queue consumed by the worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Store a job for eventual execution, returning its id
    async fn enqueue(&self, job: &Job) -> Result<i64>;

    /// Reserve the oldest runnable job, if any
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>>;

    /// Report progress as a fraction in `0.0..=1.0`
    async fn progress(&self, job_id: i64, fraction: f64) -> Result<()>;

    async fn complete(&self, job_id: i64) -> Result<()>;

    /// Record a failed attempt; returns the resulting status
    async fn fail(&self, job_id: i64, error: &str, now: DateTime<Utc>) -> Result<JobStatus>;

    async fn stats(&self) -> Result<JobStats>;

    /// Wait until a job may be available or `timeout` elapses
    async fn wait(&self, timeout: std::time::Duration) {
        tokio::time::sleep(timeout).await;
    }
}

/// [`JobQueue`] backed by the `jobs` table
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    notify: Arc<Notify>,
    reserve_timeout: Duration,
    max_attempts: i64,
    retry_delay: Duration,
}

impl SqliteJobQueue {
    pub fn new(db: &Database, reserve_timeout: Duration, max_attempts: i64) -> Self {
        Self {
            pool: db.pool().clone(),
            notify: Arc::new(Notify::new()),
            reserve_timeout,
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::seconds(30),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Status of one job, mostly useful in tests and tooling
    pub async fn status(&self, job_id: i64) -> Result<Option<(JobStatus, f64)>> {
        let row = sqlx::query("SELECT status, progress FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| {
            let status = match r.get::<String, _>("status").as_str() {
                "reserved" => JobStatus::Reserved,
                "done" => JobStatus::Done,
                "failed" => JobStatus::Failed,
                _ => JobStatus::Pending,
            };
            (status, r.get("progress"))
        }))
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<i64> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (payload, description, status, available_at, created_at, updated_at)
            VALUES (?, ?, 'pending', ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(encode_json(job, "payload")?)
        .bind(job.description())
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let id: i64 = row.get("id");
        debug!(job_id = id, description = %job.description(), "Job enqueued");
        self.notify.notify_one();
        Ok(id)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
        let stale_before = now - self.reserve_timeout;
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'reserved', reserved_at = ?, attempts = attempts + 1, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND available_at <= ?)
                   OR (status = 'reserved' AND reserved_at < ?)
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(now.timestamp())
        .bind(now.timestamp())
        .bind(now.timestamp())
        .bind(stale_before.timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get("id");
        match decode_json::<Job>(row.get("payload"), "payload") {
            Ok(job) => Ok(Some(ClaimedJob {
                id,
                job,
                attempts: row.get("attempts"),
            })),
            Err(e) => {
                // Unreadable payloads never become runnable
                warn!(job_id = id, error = %e, "Dropping job with corrupt payload");
                sqlx::query("UPDATE jobs SET status = 'failed', error = ?, updated_at = ? WHERE id = ?")
                    .bind(e.to_string())
                    .bind(now.timestamp())
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(DbError::SqlxError)?;
                Ok(None)
            }
        }
    }

    async fn progress(&self, job_id: i64, fraction: f64) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(fraction.clamp(0.0, 1.0))
            .bind(Utc::now().timestamp())
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'done', progress = 1, error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str, now: DateTime<Utc>) -> Result<JobStatus> {
        let row = sqlx::query("SELECT attempts FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        let attempts: i64 = row.map(|r| r.get("attempts")).unwrap_or(self.max_attempts);

        let status = if attempts >= self.max_attempts {
            JobStatus::Failed
        } else {
            JobStatus::Pending
        };
        let available_at = now + self.retry_delay * attempts as i32;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, error = ?, available_at = ?, reserved_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(available_at.timestamp())
        .bind(now.timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(status)
    }

    async fn stats(&self) -> Result<JobStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut stats = JobStats::default();
        for r in rows {
            let count: i64 = r.get("count");
            match r.get::<String, _>("status").as_str() {
                "pending" => stats.pending = count,
                "reserved" => stats.reserved = count,
                "done" => stats.done = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn wait(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (SqliteJobQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (SqliteJobQueue::new(&db, Duration::minutes(5), 2), temp_dir)
    }

    #[test]
    fn test_job_description_and_serialization() {
        let job = Job::publish_share(4, "Acme Page");
        assert_eq!(job.description(), "Posting to Acme Page");

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "publish_share");
        assert_eq!(json["share_id"], 4);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_and_fifo() {
        let (queue, _dir) = setup().await;
        let first = queue.enqueue(&Job::publish_share(1, "A")).await.unwrap();
        let second = queue.enqueue(&Job::publish_share(2, "B")).await.unwrap();

        let now = Utc::now();
        let claimed = queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.attempts, 1);

        let claimed = queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(claimed.id, second);
        assert!(queue.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_reservation_is_reclaimed() {
        let (queue, _dir) = setup().await;
        let id = queue.enqueue(&Job::publish_share(1, "A")).await.unwrap();

        let now = Utc::now();
        queue.claim_next(now).await.unwrap().unwrap();

        let later = now + Duration::minutes(10);
        let reclaimed = queue.claim_next(later).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn test_fail_retries_until_max_attempts() {
        let (queue, _dir) = setup().await;
        let id = queue.enqueue(&Job::publish_share(1, "A")).await.unwrap();
        let now = Utc::now();

        queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(queue.fail(id, "boom", now).await.unwrap(), JobStatus::Pending);
        // Not runnable before the retry delay
        assert!(queue.claim_next(now).await.unwrap().is_none());

        let later = now + Duration::minutes(1);
        queue.claim_next(later).await.unwrap().unwrap();
        assert_eq!(queue.fail(id, "boom", later).await.unwrap(), JobStatus::Failed);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_zero_retry_delay_requeues_immediately() {
        let (queue, _dir) = setup().await;
        let queue = queue.with_retry_delay(Duration::zero());
        let id = queue.enqueue(&Job::publish_share(1, "A")).await.unwrap();
        let now = Utc::now();

        queue.claim_next(now).await.unwrap().unwrap();
        queue.fail(id, "boom", now).await.unwrap();

        let retried = queue.claim_next(now).await.unwrap().unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempts, 2);
    }

    #[tokio::test]
    async fn test_complete_sets_progress() {
        let (queue, _dir) = setup().await;
        let id = queue.enqueue(&Job::publish_share(1, "A")).await.unwrap();
        queue.claim_next(Utc::now()).await.unwrap().unwrap();
        queue.complete(id).await.unwrap();

        assert_eq!(queue.status(id).await.unwrap(), Some((JobStatus::Done, 1.0)));
    }
}
