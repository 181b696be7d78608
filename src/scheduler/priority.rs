//! Deadline-aware priority computation
//!
//! Lower values are claimed first. Deadlines map to coarse bands and each
//! job kind adds a small stable offset inside its band, so ordering is
//! fully deterministic for a given snapshot of the queue.

use chrono::{DateTime, Utc};

use crate::models::JobKind;

const BAND_URGENT: i64 = 0; // deadline within 7 days
const BAND_HIGH: i64 = 100; // deadline within 30 days
const BAND_NORMAL: i64 = 200; // deadline further out
const BAND_NO_DEADLINE: i64 = 300;

fn kind_offset(job_kind: JobKind) -> i64 {
    match job_kind {
        JobKind::ExtractForms => 0,
        JobKind::EnrichRegistry => 1,
        JobKind::EnrichPortal => 2,
    }
}

/// Priority for a job enqueued at `now` for an item with the given deadline.
///
/// A deadline that already passed still lands in the urgent band; the item
/// may have been extended upstream and dropping it silently would be worse
/// than crawling it once more.
pub fn priority_for(job_kind: JobKind, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let band = match deadline {
        Some(deadline) => {
            let days_left = (deadline - now).num_days();
            if days_left <= 7 {
                BAND_URGENT
            } else if days_left <= 30 {
                BAND_HIGH
            } else {
                BAND_NORMAL
            }
        }
        None => BAND_NO_DEADLINE,
    };

    band + kind_offset(job_kind)
}
