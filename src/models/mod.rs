use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The operation a crawl job performs against its target URL.
///
/// Each kind has its own eligibility predicate (see `sources`) and a stable
/// offset inside a priority band so that ordering between kinds is
/// deterministic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Extract application form links and required documents from the item's page
    ExtractForms,
    /// Enrich an item from the government registry API
    EnrichRegistry,
    /// Enrich an item from its portal detail page
    EnrichPortal,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ExtractForms => "extract_forms",
            JobKind::EnrichRegistry => "enrich_registry",
            JobKind::EnrichPortal => "enrich_portal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extract_forms" => Some(JobKind::ExtractForms),
            "enrich_registry" => Some(JobKind::EnrichRegistry),
            "enrich_portal" => Some(JobKind::EnrichPortal),
            _ => None,
        }
    }

    /// All kinds the enqueuer scans for, in scan order.
    pub fn all() -> [JobKind; 3] {
        [
            JobKind::ExtractForms,
            JobKind::EnrichRegistry,
            JobKind::EnrichPortal,
        ]
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// Transitions happen exclusively through the lease manager:
/// `queued -> leased -> {done | queued (retry) | failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Leased,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "leased" => Some(JobStatus::Leased),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Hint for the executor describing how the target should be fetched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    /// Fetch the one page behind `url`
    SinglePage,
    /// Fetch a listing/map page and its direct entries
    Map,
    /// Follow links up to `max_depth`
    DeepCrawl,
}

impl CrawlStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStrategy::SinglePage => "single_page",
            CrawlStrategy::Map => "map",
            CrawlStrategy::DeepCrawl => "deep_crawl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single_page" => Some(CrawlStrategy::SinglePage),
            "map" => Some(CrawlStrategy::Map),
            "deep_crawl" => Some(CrawlStrategy::DeepCrawl),
            _ => None,
        }
    }
}

/// A unit of crawl/enrichment work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Deterministic id: `"{job_kind}:{item_id}"`
    pub id: String,
    pub item_id: String,
    pub shard_key: u32,
    pub job_kind: JobKind,
    pub url: String,
    pub domain_key: String,
    pub crawl_strategy: CrawlStrategy,
    pub max_depth: u32,
    pub priority: i64,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Deterministic job id for a given item and kind.
    pub fn deterministic_id(job_kind: JobKind, item_id: &str) -> String {
        format!("{}:{}", job_kind.as_str(), item_id)
    }
}

/// Per-source-domain health record, created lazily on first failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPolicy {
    pub domain_key: String,
    pub consecutive_failures: u32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainPolicy {
    /// A domain is blocked while `blocked_until` lies in the future.
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map(|until| until > now).unwrap_or(false)
    }
}

/// An upstream item discovered by an eligibility predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibleItem {
    pub item_id: String,
    pub url: String,
    pub domain_key: String,
    pub deadline: Option<DateTime<Utc>>,
}
