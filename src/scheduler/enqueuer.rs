//! Periodic enqueuer
//!
//! Scans the eligibility predicates and materialises missing jobs. Running
//! it twice in a row is harmless: the deterministic job id plus the
//! queued/leased guard make every insert idempotent.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::priority::priority_for;
use super::shard::shard_of;
use super::EnqueueReport;
use crate::config::SchedulerConfig;
use crate::database::jobs::NewJob;
use crate::database::Database;
use crate::models::{CrawlStrategy, EligibleItem, JobKind};
use crate::sources::EligibilitySource;

/// Fetch plan each job kind hands to the executor.
fn crawl_plan(job_kind: JobKind) -> (CrawlStrategy, u32) {
    match job_kind {
        // Form links are often one hop away from the item's entry page
        JobKind::ExtractForms => (CrawlStrategy::Map, 2),
        JobKind::EnrichRegistry => (CrawlStrategy::SinglePage, 1),
        JobKind::EnrichPortal => (CrawlStrategy::SinglePage, 1),
    }
}

pub struct Enqueuer {
    database: Database,
    source: Arc<dyn EligibilitySource>,
    shard_count: u32,
    max_attempts: u32,
}

impl Enqueuer {
    pub fn new(
        database: Database,
        source: Arc<dyn EligibilitySource>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            database,
            source,
            shard_count: config.shard_count,
            max_attempts: config.max_attempts,
        }
    }

    /// One enqueue pass over all job kinds.
    ///
    /// Per-item errors are logged and skipped; one bad row never aborts
    /// the pass.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<EnqueueReport> {
        let mut report = EnqueueReport::default();

        for job_kind in JobKind::all() {
            let items = self.source.eligible_items(job_kind, now).await?;
            report.scanned += items.len() as u64;

            for item in items {
                match self.enqueue_item(job_kind, &item, now).await {
                    Ok(true) => report.enqueued += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(
                            item_id = %item.item_id,
                            kind = %job_kind,
                            "Failed to enqueue item: {}",
                            e
                        );
                        report.skipped += 1;
                    }
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            enqueued = report.enqueued,
            skipped = report.skipped,
            "Enqueue pass finished"
        );
        Ok(report)
    }

    async fn enqueue_item(
        &self,
        job_kind: JobKind,
        item: &EligibleItem,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Items with a queued or leased job of this kind are skipped up
        // front; the insert keeps its own guard for the race window
        if self.database.has_unresolved_job(&item.item_id, job_kind).await? {
            return Ok(false);
        }

        let shard_key = self.resolve_shard(&item.item_id, now).await?;
        let priority = priority_for(job_kind, item.deadline, now);
        let (crawl_strategy, max_depth) = crawl_plan(job_kind);

        let new_job = NewJob {
            item_id: item.item_id.clone(),
            shard_key,
            job_kind,
            url: item.url.clone(),
            domain_key: item.domain_key.clone(),
            crawl_strategy,
            max_depth,
            priority,
            max_attempts: self.max_attempts,
        };

        // New jobs are due immediately; the shard window decides when they
        // actually get picked up.
        let inserted = self.database.insert_job_if_absent(&new_job, now, now).await?;
        if inserted {
            tracing::debug!(
                item_id = %item.item_id,
                kind = %job_kind,
                shard = shard_key,
                priority,
                "Enqueued job"
            );
        }
        Ok(inserted)
    }

    /// Use the item's persisted shard, assigning one on first contact.
    async fn resolve_shard(&self, item_id: &str, now: DateTime<Utc>) -> Result<u32> {
        if let Some(existing) = self.database.get_item_shard(item_id).await? {
            return Ok(existing);
        }

        let shard_key = shard_of(item_id, self.shard_count);
        self.database.assign_item_shard(item_id, shard_key, now).await?;
        // A concurrent writer may have won; their value is authoritative
        Ok(self
            .database
            .get_item_shard(item_id)
            .await?
            .unwrap_or(shard_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::sources::SqlEligibilitySource;
    use chrono::Duration;

    async fn test_setup() -> (Database, Enqueuer) {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let source = Arc::new(SqlEligibilitySource::new(db.clone()));
        let config = SchedulerConfig {
            shard_count: 16,
            rotation_period_minutes: 5,
            batch_size: 10,
            lease_minutes: 8,
            max_attempts: 4,
            consume_interval_seconds: 300,
            enqueue_cron: "0 0 0 * * * *".to_string(),
        };
        let enqueuer = Enqueuer::new(db.clone(), source, &config);
        (db, enqueuer)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_across_runs() {
        let (db, enqueuer) = test_setup().await;
        let now = Utc::now();

        db.upsert_source_item("reg-1", "registry", Some("https://a.org/x"), None, false, now)
            .await
            .unwrap();

        let first = enqueuer.run(now).await.unwrap();
        // Item qualifies for extract_forms (not yet ready) and enrich_registry
        assert_eq!(first.enqueued, 2);

        let second = enqueuer.run(now).await.unwrap();
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_enqueue_persists_shard_and_priority() {
        let (db, enqueuer) = test_setup().await;
        let now = Utc::now();
        let deadline = now + Duration::days(5);

        db.upsert_source_item(
            "reg-1",
            "registry",
            Some("https://a.org/x"),
            Some(deadline),
            false,
            now,
        )
        .await
        .unwrap();

        enqueuer.run(now).await.unwrap();

        let expected_shard = shard_of("reg-1", 16);
        assert_eq!(db.get_item_shard("reg-1").await.unwrap(), Some(expected_shard));

        let job = db
            .get_job("enrich_registry:reg-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.shard_key, expected_shard);
        assert_eq!(job.status, JobStatus::Queued);
        // 5 days out lands in the urgent band plus the registry offset
        assert_eq!(job.priority, 1);
        assert_eq!(job.max_attempts, 4);
    }

    #[tokio::test]
    async fn test_existing_shard_assignment_is_reused() {
        let (db, enqueuer) = test_setup().await;
        let now = Utc::now();

        db.upsert_source_item("reg-1", "registry", Some("https://a.org/x"), None, false, now)
            .await
            .unwrap();
        // Pre-assigned shard from an earlier deployment with other settings
        db.assign_item_shard("reg-1", 11, now).await.unwrap();

        enqueuer.run(now).await.unwrap();
        let job = db.get_job("enrich_registry:reg-1").await.unwrap().unwrap();
        assert_eq!(job.shard_key, 11);
    }
}
