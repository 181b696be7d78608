//! Job Store queries
//!
//! All status transitions here are single-row conditional updates. A zero
//! rows-affected result means another claimer got there first (or the lease
//! changed hands) and is reported as `false`, never as an error.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{parse_datetime, Database};
use crate::errors::RepositoryError;
use crate::models::{CrawlStrategy, Job, JobKind, JobStatus};

/// Fields needed to enqueue a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub item_id: String,
    pub shard_key: u32,
    pub job_kind: JobKind,
    pub url: String,
    pub domain_key: String,
    pub crawl_strategy: CrawlStrategy,
    pub max_depth: u32,
    pub priority: i64,
    pub max_attempts: u32,
}

const JOB_COLUMNS: &str = "id, item_id, shard_key, job_kind, url, domain_key, crawl_strategy, \
     max_depth, priority, status, attempts, max_attempts, lease_owner, lease_expires_at, \
     scheduled_at, last_error, created_at, updated_at";

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let job_kind_str: String = row.get("job_kind");
    let job_kind = JobKind::parse(&job_kind_str)
        .ok_or_else(|| RepositoryError::invalid_stored_value("job_kind", &job_kind_str))?;

    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::invalid_stored_value("status", &status_str))?;

    let strategy_str: String = row.get("crawl_strategy");
    let crawl_strategy = CrawlStrategy::parse(&strategy_str)
        .ok_or_else(|| RepositoryError::invalid_stored_value("crawl_strategy", &strategy_str))?;

    let lease_expires_at = row
        .get::<Option<String>, _>("lease_expires_at")
        .map(|s| parse_datetime(&s))
        .transpose()?;

    Ok(Job {
        id: row.get("id"),
        item_id: row.get("item_id"),
        shard_key: row.get::<i64, _>("shard_key") as u32,
        job_kind,
        url: row.get("url"),
        domain_key: row.get("domain_key"),
        crawl_strategy,
        max_depth: row.get::<i64, _>("max_depth") as u32,
        priority: row.get::<i64, _>("priority"),
        status,
        attempts: row.get::<i64, _>("attempts") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        lease_owner: row.get("lease_owner"),
        lease_expires_at,
        scheduled_at: parse_datetime(&row.get::<String, _>("scheduled_at"))?,
        last_error: row.get("last_error"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
    })
}

impl Database {
    /// Insert a job unless one already exists for this (item, kind).
    ///
    /// The deterministic primary key makes this an idempotent
    /// insert-if-absent; the additional queued/leased guard keeps the
    /// at-most-one-pending invariant even if terminal rows were archived
    /// by external housekeeping.
    ///
    /// Returns `true` if a row was inserted.
    pub async fn insert_job_if_absent(
        &self,
        new_job: &NewJob,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let id = Job::deterministic_id(new_job.job_kind, &new_job.item_id);

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO crawl_jobs (
                id, item_id, shard_key, job_kind, url, domain_key,
                crawl_strategy, max_depth, priority, status, attempts,
                max_attempts, scheduled_at, created_at, updated_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, 'queued', 0, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM crawl_jobs
                WHERE item_id = ? AND job_kind = ? AND status IN ('queued', 'leased')
            )
            "#,
        )
        .bind(&id)
        .bind(&new_job.item_id)
        .bind(new_job.shard_key as i64)
        .bind(new_job.job_kind.as_str())
        .bind(&new_job.url)
        .bind(&new_job.domain_key)
        .bind(new_job.crawl_strategy.as_str())
        .bind(new_job.max_depth as i64)
        .bind(new_job.priority)
        .bind(new_job.max_attempts as i64)
        .bind(scheduled_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&new_job.item_id)
        .bind(new_job.job_kind.as_str())
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool())
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// List queued jobs that a consumer may claim right now: due, in one of
    /// the active shards, and not behind a domain block.
    pub async fn list_claimable_jobs(
        &self,
        shards: &[u32],
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Job>> {
        if shards.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; shards.len()].join(", ");
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM crawl_jobs j
            WHERE j.status = 'queued'
              AND j.shard_key IN ({placeholders})
              AND j.scheduled_at <= ?
              AND NOT EXISTS (
                  SELECT 1 FROM domain_policy dp
                  WHERE dp.domain_key = j.domain_key
                    AND dp.blocked_until IS NOT NULL
                    AND dp.blocked_until > ?
              )
            ORDER BY j.priority ASC, j.scheduled_at ASC
            LIMIT ?
            "#
        );

        let mut query = sqlx::query(&sql);
        for shard in shards {
            query = query.bind(*shard as i64);
        }
        let rows = query
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(limit as i64)
            .fetch_all(&self.pool())
            .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Compare-and-swap claim: queued -> leased.
    ///
    /// Returns `false` when a concurrent claimer already flipped the row;
    /// that is a lost race, not an error.
    pub async fn try_claim_job(
        &self,
        id: &str,
        lease_owner: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'leased', lease_owner = ?, lease_expires_at = ?, updated_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(lease_owner)
        .bind(lease_expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lease as successful: leased -> done.
    pub async fn release_done(
        &self,
        id: &str,
        lease_owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'done', lease_owner = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'leased' AND lease_owner = ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(lease_owner)
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lease back to the queue for a later retry: leased -> queued.
    pub async fn release_retry(
        &self,
        id: &str,
        lease_owner: &str,
        attempts: u32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'queued', attempts = ?, scheduled_at = ?, last_error = ?,
                lease_owner = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'leased' AND lease_owner = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(scheduled_at.to_rfc3339())
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(lease_owner)
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lease as terminally failed: leased -> failed.
    pub async fn release_failed(
        &self,
        id: &str,
        lease_owner: &str,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed', attempts = ?, last_error = ?,
                lease_owner = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'leased' AND lease_owner = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(lease_owner)
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Leased rows whose lease expired without ever being released.
    pub async fn list_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM crawl_jobs
            WHERE status = 'leased' AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?
            "#
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Reclaim one expired lease back to the queue. Guarded by the expiry so
    /// a worker that is merely slow (lease renewed meanwhile) is untouched.
    pub async fn reclaim_expired_retry(
        &self,
        id: &str,
        attempts: u32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'queued', attempts = ?, scheduled_at = ?, last_error = 'lease expired',
                lease_owner = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'leased'
              AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?
            "#,
        )
        .bind(attempts as i64)
        .bind(scheduled_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(now.to_rfc3339())
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark one expired lease as terminally failed (retry budget exhausted).
    pub async fn reclaim_expired_failed(
        &self,
        id: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'failed', attempts = ?, last_error = 'lease expired',
                lease_owner = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'leased'
              AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?
            "#,
        )
        .bind(attempts as i64)
        .bind(now.to_rfc3339())
        .bind(id)
        .bind(now.to_rfc3339())
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// True if the item has a queued or leased job of this kind.
    pub async fn has_unresolved_job(&self, item_id: &str, job_kind: JobKind) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM crawl_jobs
            WHERE item_id = ? AND job_kind = ? AND status IN ('queued', 'leased')
            "#,
        )
        .bind(item_id)
        .bind(job_kind.as_str())
        .fetch_one(&self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Job counts per status, for the stats endpoint and logs.
    pub async fn count_jobs_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) as count FROM crawl_jobs GROUP BY status")
                .fetch_all(&self.pool())
                .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("count")))
            .collect())
    }
}
