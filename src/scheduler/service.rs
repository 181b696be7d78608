//! Long-running scheduler loop
//!
//! Drives the consumer on a fixed interval and the enqueuer on a cron
//! cadence. Both can also be triggered manually through the web layer; the
//! underlying operations are idempotent so overlap with the loop is safe.

use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::consumer::Consumer;
use super::enqueuer::Enqueuer;
use super::{ConsumeReport, EnqueueReport};
use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::errors::SchedulerError;

/// Snapshot served by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub primary_shard: u32,
    pub secondary_shard: u32,
    pub shard_count: u32,
    pub jobs_by_status: BTreeMap<String, i64>,
}

pub struct SchedulerService {
    database: Database,
    enqueuer: Enqueuer,
    consumer: Consumer,
    consume_interval: Duration,
    enqueue_schedule: Schedule,
}

impl SchedulerService {
    pub fn new(
        database: Database,
        enqueuer: Enqueuer,
        consumer: Consumer,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        let enqueue_schedule = Schedule::from_str(&config.enqueue_cron).map_err(|e| {
            SchedulerError::configuration(format!(
                "invalid enqueue cron '{}': {e}",
                config.enqueue_cron
            ))
        })?;

        Ok(Self {
            database,
            enqueuer,
            consumer,
            consume_interval: Duration::from_secs(config.consume_interval_seconds),
            enqueue_schedule,
        })
    }

    /// Run the scheduler loop forever.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        info!(
            consume_interval_secs = self.consume_interval.as_secs(),
            "Starting scheduler service"
        );

        let mut next_enqueue = self.enqueue_schedule.upcoming(Utc).next();
        if let Some(at) = next_enqueue {
            info!(next_enqueue = %at, "Next enqueue pass scheduled");
        }

        let mut ticker = interval(self.consume_interval);

        loop {
            ticker.tick().await;
            let now = Utc::now();

            if let Some(due) = next_enqueue {
                if now >= due {
                    if let Err(e) = self.enqueuer.run(now).await {
                        error!("Enqueue pass failed: {}", e);
                    }
                    next_enqueue = self.enqueue_schedule.after(&now).next();
                }
            }

            if let Err(e) = self.consumer.tick(now).await {
                error!("Consumer tick failed: {}", e);
            }
        }
    }

    /// Manual enqueue pass, exposed through the web layer.
    pub async fn run_enqueuer(&self, now: DateTime<Utc>) -> Result<EnqueueReport> {
        self.enqueuer.run(now).await
    }

    /// Manual consumer run. With `shard` set the window is pinned to that
    /// shard instead of the one the clock selects.
    pub async fn run_consumer(
        &self,
        shard: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ConsumeReport> {
        match shard {
            Some(shard) => self.consumer.run_shard(shard, now).await,
            None => self.consumer.tick(now).await,
        }
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<SchedulerStats> {
        let window = self.consumer.clock().window_at(now);
        let jobs_by_status = self
            .database
            .count_jobs_by_status()
            .await?
            .into_iter()
            .collect();

        Ok(SchedulerStats {
            primary_shard: window.primary,
            secondary_shard: window.secondary,
            shard_count: self.consumer.clock().shard_count(),
            jobs_by_status,
        })
    }
}
