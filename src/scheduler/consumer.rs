//! Consumer tick
//!
//! One tick serves the shard window active at that instant: sweep abandoned
//! leases, claim a batch of due jobs, execute each one, and release the
//! lease according to the outcome.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::lease::LeaseManager;
use super::shard::{ShardClock, ShardWindow};
use super::ConsumeReport;
use crate::executor::{ExecutionOutcome, ExecutionRequest, Executor};

pub struct Consumer {
    lease_manager: LeaseManager,
    executor: Arc<dyn Executor>,
    clock: ShardClock,
    batch_size: u32,
    execution_timeout: Duration,
}

impl Consumer {
    pub fn new(
        lease_manager: LeaseManager,
        executor: Arc<dyn Executor>,
        clock: ShardClock,
        batch_size: u32,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            lease_manager,
            executor,
            clock,
            batch_size,
            execution_timeout,
        }
    }

    pub fn clock(&self) -> &ShardClock {
        &self.clock
    }

    /// Serve the window the shard clock selects for `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<ConsumeReport> {
        self.run_window(self.clock.window_at(now), now).await
    }

    /// Serve one explicitly chosen shard, for manual runs.
    pub async fn run_shard(&self, shard: u32, now: DateTime<Utc>) -> Result<ConsumeReport> {
        self.run_window(self.clock.pinned(shard), now).await
    }

    async fn run_window(&self, window: ShardWindow, now: DateTime<Utc>) -> Result<ConsumeReport> {
        let mut report = ConsumeReport {
            primary_shard: window.primary,
            secondary_shard: window.secondary,
            ..ConsumeReport::default()
        };

        report.reclaimed = self.lease_manager.sweep_expired(now).await?.into();

        let jobs = self
            .lease_manager
            .claim_due_jobs(&window.shards(), self.batch_size, now)
            .await?;
        report.claimed = jobs.len() as u64;

        for job in jobs {
            let request = ExecutionRequest {
                job_id: job.id.clone(),
                url: job.url.clone(),
                crawl_strategy: job.crawl_strategy,
                max_depth: job.max_depth,
                timeout: self.execution_timeout,
            };

            // Hard ceiling on top of whatever the executor enforces itself,
            // so a misbehaving executor cannot stall the tick
            let outcome = match tokio::time::timeout(
                self.execution_timeout,
                self.executor.execute(&request),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ExecutionOutcome::RecoverableError(format!(
                    "execution exceeded {}s budget",
                    self.execution_timeout.as_secs()
                )),
            };

            match outcome {
                ExecutionOutcome::Success => {
                    self.lease_manager.complete(&job, now).await?;
                    report.succeeded += 1;
                }
                ExecutionOutcome::RecoverableError(error) => {
                    use super::lease::FailureResolution;
                    match self.lease_manager.fail_recoverable(&job, &error, now).await? {
                        FailureResolution::Retried { .. } => report.retried += 1,
                        FailureResolution::Exhausted => report.failed += 1,
                    }
                }
                ExecutionOutcome::FatalError(error) => {
                    self.lease_manager.fail_fatal(&job, &error, now).await?;
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            primary = window.primary,
            secondary = window.secondary,
            claimed = report.claimed,
            succeeded = report.succeeded,
            retried = report.retried,
            failed = report.failed,
            reclaimed = report.reclaimed,
            "Consumer tick finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::jobs::NewJob;
    use crate::database::Database;
    use crate::models::{CrawlStrategy, JobKind, JobStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Executor returning pre-scripted outcomes in order.
    struct ScriptedExecutor {
        outcomes: Mutex<Vec<ExecutionOutcome>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, _request: &ExecutionRequest) -> ExecutionOutcome {
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(ExecutionOutcome::Success)
        }
    }

    async fn test_db() -> Database {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn consumer_with(db: &Database, executor: ScriptedExecutor) -> Consumer {
        Consumer::new(
            LeaseManager::new(db.clone(), 8),
            Arc::new(executor),
            ShardClock::new(16, 5),
            10,
            Duration::from_secs(30),
        )
    }

    async fn enqueue_on_shard(db: &Database, item_id: &str, shard_key: u32, now: DateTime<Utc>) {
        let new_job = NewJob {
            item_id: item_id.to_string(),
            shard_key,
            job_kind: JobKind::ExtractForms,
            url: format!("https://example.org/{item_id}"),
            domain_key: "example.org".to_string(),
            crawl_strategy: CrawlStrategy::SinglePage,
            max_depth: 1,
            priority: 100,
            max_attempts: 3,
        };
        db.insert_job_if_absent(&new_job, now, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_only_serves_active_window() {
        let db = test_db().await;
        let now = Utc::now();
        let clock = ShardClock::new(16, 5);
        let window = clock.window_at(now);
        let inactive = (window.primary + 1) % 16;

        enqueue_on_shard(&db, "active-item", window.primary, now).await;
        enqueue_on_shard(&db, "inactive-item", inactive, now).await;

        let consumer = consumer_with(&db, ScriptedExecutor::new(vec![]));
        let report = consumer.tick(now).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 1);

        let untouched = db
            .get_job("extract_forms:inactive-item")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_manual_run_overrides_window() {
        let db = test_db().await;
        let now = Utc::now();
        enqueue_on_shard(&db, "item-1", 13, now).await;

        let consumer = consumer_with(&db, ScriptedExecutor::new(vec![]));
        let report = consumer.run_shard(13, now).await.unwrap();
        assert_eq!(report.primary_shard, 13);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_outcomes_map_to_report_counters() {
        let db = test_db().await;
        let now = Utc::now();
        let clock = ShardClock::new(16, 5);
        let shard = clock.window_at(now).primary;

        for i in 0..3 {
            enqueue_on_shard(&db, &format!("item-{i}"), shard, now).await;
        }

        // Popped in reverse order: success, recoverable, fatal
        let consumer = consumer_with(
            &db,
            ScriptedExecutor::new(vec![
                ExecutionOutcome::FatalError("410".into()),
                ExecutionOutcome::RecoverableError("timeout".into()),
                ExecutionOutcome::Success,
            ]),
        );

        let report = consumer.tick(now).await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed, 1);
    }
}
