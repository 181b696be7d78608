//! Lease lifecycle
//!
//! All job status transitions funnel through here: claiming queued work,
//! releasing leases on success or failure, and sweeping leases whose worker
//! vanished. The retry ladder and the domain circuit breaker are applied at
//! release time so the database layer stays purely mechanical.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::backoff::{backoff_delay, domain_block_duration, should_block_domain};
use crate::database::Database;
use crate::models::Job;

/// How a failed attempt was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureResolution {
    /// Requeued with backoff; next attempt no earlier than the given time.
    Retried { next_attempt_at: DateTime<Utc> },
    /// Retry budget exhausted, the job is terminally failed.
    Exhausted,
}

pub struct LeaseManager {
    database: Database,
    lease_minutes: u32,
    worker_id: String,
}

impl LeaseManager {
    pub fn new(database: Database, lease_minutes: u32) -> Self {
        Self {
            database,
            lease_minutes,
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn lease_duration(&self) -> Duration {
        Duration::minutes(self.lease_minutes as i64)
    }

    /// Claim up to `limit` due jobs from the given shards.
    ///
    /// Each claim is a compare-and-swap; rows another consumer grabbed
    /// between the select and the update are skipped silently.
    pub async fn claim_due_jobs(
        &self,
        shards: &[u32],
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        let candidates = self.database.list_claimable_jobs(shards, now, limit).await?;
        let lease_expires_at = now + self.lease_duration();

        let mut claimed = Vec::new();
        for candidate in candidates {
            let won = self
                .database
                .try_claim_job(&candidate.id, &self.worker_id, lease_expires_at, now)
                .await?;
            if !won {
                tracing::debug!(job_id = %candidate.id, "Lost claim race, skipping");
                continue;
            }
            if let Some(job) = self.database.get_job(&candidate.id).await? {
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    /// Release a lease after a successful attempt. The domain's failure
    /// streak resets immediately, though an already-tripped block window
    /// still runs out on its own.
    pub async fn complete(&self, job: &Job, now: DateTime<Utc>) -> Result<()> {
        self.database.release_done(&job.id, &self.worker_id, now).await?;
        self.database.reset_domain_failures(&job.domain_key, now).await?;
        tracing::debug!(job_id = %job.id, "Job completed");
        Ok(())
    }

    /// Release a lease after a transient failure: requeue with backoff, or
    /// fail terminally once the retry budget is spent. Either way the
    /// domain's failure streak grows.
    pub async fn fail_recoverable(
        &self,
        job: &Job,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureResolution> {
        let attempts = job.attempts + 1;
        self.note_domain_failure(&job.domain_key, now).await?;

        match backoff_delay(attempts) {
            Some(delay) if attempts < job.max_attempts => {
                let next_attempt_at = now + delay;
                self.database
                    .release_retry(&job.id, &self.worker_id, attempts, next_attempt_at, error, now)
                    .await?;
                tracing::debug!(
                    job_id = %job.id,
                    attempts,
                    next_attempt_at = %next_attempt_at,
                    "Job requeued with backoff"
                );
                Ok(FailureResolution::Retried { next_attempt_at })
            }
            _ => {
                self.database
                    .release_failed(&job.id, &self.worker_id, attempts, error, now)
                    .await?;
                tracing::warn!(job_id = %job.id, attempts, error, "Job failed terminally");
                Ok(FailureResolution::Exhausted)
            }
        }
    }

    /// Release a lease after a failure that retrying cannot fix.
    pub async fn fail_fatal(&self, job: &Job, error: &str, now: DateTime<Utc>) -> Result<()> {
        let attempts = job.attempts + 1;
        self.note_domain_failure(&job.domain_key, now).await?;
        self.database
            .release_failed(&job.id, &self.worker_id, attempts, error, now)
            .await?;
        tracing::warn!(job_id = %job.id, error, "Job failed fatally");
        Ok(())
    }

    /// Reclaim leases whose worker never reported back. The expiry counts
    /// as one failed attempt against the retry budget, but not against the
    /// domain: a crashed worker says nothing about the target's health.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u32> {
        let expired = self.database.list_expired_leases(now).await?;
        let mut reclaimed = 0;

        for job in expired {
            let attempts = job.attempts + 1;
            let done = match backoff_delay(attempts) {
                Some(delay) if attempts < job.max_attempts => {
                    self.database
                        .reclaim_expired_retry(&job.id, attempts, now + delay, now)
                        .await?
                }
                _ => {
                    self.database
                        .reclaim_expired_failed(&job.id, attempts, now)
                        .await?
                }
            };
            if done {
                reclaimed += 1;
                tracing::warn!(
                    job_id = %job.id,
                    owner = job.lease_owner.as_deref().unwrap_or("?"),
                    attempts,
                    "Reclaimed expired lease"
                );
            }
        }

        Ok(reclaimed)
    }

    async fn note_domain_failure(&self, domain_key: &str, now: DateTime<Utc>) -> Result<()> {
        let failures = self.database.record_domain_failure(domain_key, None, now).await?;
        if should_block_domain(failures) {
            let blocked_until = now + domain_block_duration();
            self.database
                .set_domain_blocked_until(domain_key, blocked_until, now)
                .await?;
            tracing::warn!(
                domain_key,
                failures,
                blocked_until = %blocked_until,
                "Domain circuit breaker tripped"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::jobs::NewJob;
    use crate::models::{CrawlStrategy, JobKind, JobStatus};

    async fn test_db() -> Database {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    async fn enqueue_sample(db: &Database, item_id: &str, now: DateTime<Utc>) -> String {
        let new_job = NewJob {
            item_id: item_id.to_string(),
            shard_key: 0,
            job_kind: JobKind::ExtractForms,
            url: format!("https://example.org/{item_id}"),
            domain_key: "example.org".to_string(),
            crawl_strategy: CrawlStrategy::SinglePage,
            max_depth: 1,
            priority: 100,
            max_attempts: 3,
        };
        db.insert_job_if_absent(&new_job, now, now).await.unwrap();
        Job::deterministic_id(JobKind::ExtractForms, item_id)
    }

    #[tokio::test]
    async fn test_claim_marks_jobs_leased() {
        let db = test_db().await;
        let manager = LeaseManager::new(db.clone(), 8);
        let now = Utc::now();
        enqueue_sample(&db, "item-1", now).await;

        let claimed = manager.claim_due_jobs(&[0], 10, now).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Leased);
        assert_eq!(claimed[0].lease_owner.as_deref(), Some(manager.worker_id()));
        assert!(claimed[0].lease_expires_at.unwrap() > now);
    }

    #[tokio::test]
    async fn test_recoverable_failure_walks_the_backoff_ladder() {
        let db = test_db().await;
        let manager = LeaseManager::new(db.clone(), 8);
        let now = Utc::now();
        let id = enqueue_sample(&db, "item-1", now).await;

        // Attempt 1: retried after 15 minutes
        let job = manager.claim_due_jobs(&[0], 10, now).await.unwrap().remove(0);
        let resolution = manager.fail_recoverable(&job, "timeout", now).await.unwrap();
        assert_eq!(
            resolution,
            FailureResolution::Retried {
                next_attempt_at: now + Duration::minutes(15)
            }
        );
        let stored = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.attempts, 1);

        // Attempt 2: retried after an hour
        let t2 = now + Duration::minutes(16);
        let job = manager.claim_due_jobs(&[0], 10, t2).await.unwrap().remove(0);
        let resolution = manager.fail_recoverable(&job, "timeout", t2).await.unwrap();
        assert_eq!(
            resolution,
            FailureResolution::Retried {
                next_attempt_at: t2 + Duration::hours(1)
            }
        );

        // Attempt 3: max_attempts = 3 reached, terminal
        let t3 = t2 + Duration::hours(2);
        let job = manager.claim_due_jobs(&[0], 10, t3).await.unwrap().remove(0);
        let resolution = manager.fail_recoverable(&job, "timeout", t3).await.unwrap();
        assert_eq!(resolution, FailureResolution::Exhausted);
        let stored = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_retries() {
        let db = test_db().await;
        let manager = LeaseManager::new(db.clone(), 8);
        let now = Utc::now();
        let id = enqueue_sample(&db, "item-1", now).await;

        let job = manager.claim_due_jobs(&[0], 10, now).await.unwrap().remove(0);
        manager.fail_fatal(&job, "410 Gone", now).await.unwrap();

        let stored = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("410 Gone"));
    }

    #[tokio::test]
    async fn test_three_failures_trip_the_domain_breaker() {
        let db = test_db().await;
        let manager = LeaseManager::new(db.clone(), 8);
        let now = Utc::now();

        for i in 0..3 {
            let id = enqueue_sample(&db, &format!("item-{i}"), now).await;
            let _ = id;
        }

        let jobs = manager.claim_due_jobs(&[0], 10, now).await.unwrap();
        assert_eq!(jobs.len(), 3);
        for job in &jobs {
            manager.fail_recoverable(job, "timeout", now).await.unwrap();
        }

        let policy = db.get_domain_policy("example.org").await.unwrap().unwrap();
        assert_eq!(policy.consecutive_failures, 3);
        assert!(policy.is_blocked(now));
        assert!(policy.is_blocked(now + Duration::hours(23)));
        assert!(!policy.is_blocked(now + Duration::hours(25)));
    }

    #[tokio::test]
    async fn test_success_resets_streak_but_block_outlives_it() {
        let db = test_db().await;
        let manager = LeaseManager::new(db.clone(), 8);
        let now = Utc::now();

        for i in 0..4 {
            enqueue_sample(&db, &format!("item-{i}"), now).await;
        }
        let mut jobs = manager.claim_due_jobs(&[0], 10, now).await.unwrap();
        assert_eq!(jobs.len(), 4);
        let survivor = jobs.pop().unwrap();
        for job in &jobs {
            manager.fail_recoverable(job, "timeout", now).await.unwrap();
        }
        assert!(db.is_domain_blocked("example.org", now).await.unwrap());

        manager.complete(&survivor, now).await.unwrap();
        let policy = db.get_domain_policy("example.org").await.unwrap().unwrap();
        assert_eq!(policy.consecutive_failures, 0);
        // Success does not lift an active block
        assert!(policy.is_blocked(now));
    }

    #[tokio::test]
    async fn test_sweep_requeues_expired_leases() {
        let db = test_db().await;
        let manager = LeaseManager::new(db.clone(), 8);
        let now = Utc::now();
        let id = enqueue_sample(&db, "item-1", now).await;

        manager.claim_due_jobs(&[0], 10, now).await.unwrap();
        // Nothing to sweep while the lease is live
        assert_eq!(manager.sweep_expired(now).await.unwrap(), 0);

        let later = now + Duration::minutes(9);
        assert_eq!(manager.sweep_expired(later).await.unwrap(), 1);

        let stored = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.attempts, 1);
        // Expiry burns retry budget but leaves the domain streak alone
        assert!(db.get_domain_policy("example.org").await.unwrap().is_none());
    }
}
