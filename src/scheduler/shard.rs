//! Shard assignment and the rotating shard clock
//!
//! Items are spread over a fixed number of shards by hashing their id. A
//! wall-clock derived window picks which shard is active, so over a full
//! rotation every shard gets visited without any state being kept between
//! ticks.

use chrono::{DateTime, Utc};

/// Stable shard for an item id: CRC32 of the id modulo the shard count.
///
/// The hash is stable across process restarts and platforms, so the same
/// item always lands on the same shard for a given shard count. A zero
/// shard count is treated as a single-shard ring, matching `ShardClock`.
pub fn shard_of(item_id: &str, shard_count: u32) -> u32 {
    crc32fast::hash(item_id.as_bytes()) % shard_count.max(1)
}

/// Which shards a consumer tick should serve at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardWindow {
    /// The shard whose time window this is.
    pub primary: u32,
    /// The shard half a rotation away, drained opportunistically so a
    /// backlogged shard gets a second chance per rotation.
    pub secondary: u32,
}

impl ShardWindow {
    pub fn shards(&self) -> Vec<u32> {
        if self.primary == self.secondary {
            vec![self.primary]
        } else {
            vec![self.primary, self.secondary]
        }
    }
}

/// Derives the active shard window from wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct ShardClock {
    shard_count: u32,
    rotation_period_minutes: u32,
}

impl ShardClock {
    pub fn new(shard_count: u32, rotation_period_minutes: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
            rotation_period_minutes: rotation_period_minutes.max(1),
        }
    }

    /// The window active at `now`.
    ///
    /// The primary shard advances by one every `rotation_period_minutes`,
    /// cycling through all shards; the secondary is offset by half the ring.
    pub fn window_at(&self, now: DateTime<Utc>) -> ShardWindow {
        let epoch_minutes = now.timestamp().div_euclid(60) as u64;
        let primary =
            ((epoch_minutes / self.rotation_period_minutes as u64) % self.shard_count as u64) as u32;
        let secondary = (primary + self.shard_count / 2) % self.shard_count;
        ShardWindow { primary, secondary }
    }

    /// A window pinned to one shard, for manual runs.
    pub fn pinned(&self, shard: u32) -> ShardWindow {
        let shard = shard % self.shard_count;
        ShardWindow {
            primary: shard,
            secondary: shard,
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }
}
