//! Eligibility predicates
//!
//! Each job kind has a predicate over `source_items` deciding which items
//! should currently have a pending job of that kind. The enqueuer is generic
//! over this trait so tests can feed it synthetic item sets.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::Database;
use crate::models::{EligibleItem, JobKind};

#[async_trait]
pub trait EligibilitySource: Send + Sync {
    /// Items that should have a pending job of `job_kind` as of `now`.
    async fn eligible_items(
        &self,
        job_kind: JobKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligibleItem>>;
}

/// Predicate set backed by the `source_items` table.
pub struct SqlEligibilitySource {
    database: Database,
}

impl SqlEligibilitySource {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl EligibilitySource for SqlEligibilitySource {
    async fn eligible_items(
        &self,
        job_kind: JobKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligibleItem>> {
        match job_kind {
            JobKind::ExtractForms => self.database.list_items_for_form_extraction(now).await,
            JobKind::EnrichRegistry => self.database.list_items_for_registry_enrichment(now).await,
            JobKind::EnrichPortal => self.database.list_items_for_portal_enrichment(now).await,
        }
    }
}
