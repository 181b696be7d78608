//! Sharded crawl job scheduling
//!
//! The moving parts, from the outside in: the [`service::SchedulerService`]
//! loop drives the [`enqueuer::Enqueuer`] on a cron cadence and the
//! [`consumer::Consumer`] on a fixed interval; the consumer asks the
//! [`shard::ShardClock`] which window is active and the
//! [`lease::LeaseManager`] for claimable work.

use serde::Serialize;

pub mod backoff;
pub mod consumer;
pub mod enqueuer;
pub mod lease;
pub mod priority;
pub mod service;
pub mod shard;

pub use consumer::Consumer;
pub use enqueuer::Enqueuer;
pub use lease::LeaseManager;
pub use service::SchedulerService;
pub use shard::ShardClock;

/// Outcome of one enqueue pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueReport {
    /// Eligible items seen across all job kinds.
    pub scanned: u64,
    /// Jobs newly inserted.
    pub enqueued: u64,
    /// Items skipped because a job already existed.
    pub skipped: u64,
}

/// Outcome of one consumer tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumeReport {
    pub primary_shard: u32,
    pub secondary_shard: u32,
    /// Leases successfully claimed this tick.
    pub claimed: u64,
    pub succeeded: u64,
    /// Requeued with backoff.
    pub retried: u64,
    /// Terminally failed (fatal error or retry budget spent).
    pub failed: u64,
    /// Expired leases swept back before claiming.
    pub reclaimed: u64,
}
