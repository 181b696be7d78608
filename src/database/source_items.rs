//! Source item queries
//!
//! The scheduler owns exactly one column on `source_items`: `shard_key`.
//! Everything else belongs to the wider product and is only read here by
//! the eligibility predicates.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{parse_datetime, Database};
use crate::models::EligibleItem;
use crate::utils::domain::extract_domain_key;

fn row_to_eligible_item(row: &sqlx::sqlite::SqliteRow) -> Result<EligibleItem> {
    let url: String = row.get("url");
    let deadline = row
        .get::<Option<String>, _>("deadline")
        .map(|s| parse_datetime(&s))
        .transpose()?;

    Ok(EligibleItem {
        item_id: row.get("id"),
        domain_key: extract_domain_key(&url),
        url,
        deadline,
    })
}

impl Database {
    /// Items still waiting for form extraction (`ready` unset) whose
    /// deadline has not passed.
    pub async fn list_items_for_form_extraction(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligibleItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, deadline FROM source_items
            WHERE ready = 0 AND url IS NOT NULL AND url != ''
              AND (deadline IS NULL OR deadline >= ?)
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(row_to_eligible_item).collect()
    }

    /// Items originating from the government registry feed.
    pub async fn list_items_for_registry_enrichment(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligibleItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, deadline FROM source_items
            WHERE source = 'registry' AND url IS NOT NULL AND url != ''
              AND (deadline IS NULL OR deadline >= ?)
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(row_to_eligible_item).collect()
    }

    /// Items whose detail page lives on a portal site.
    pub async fn list_items_for_portal_enrichment(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EligibleItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, deadline FROM source_items
            WHERE source = 'portal' AND url IS NOT NULL AND url != ''
              AND (deadline IS NULL OR deadline >= ?)
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool())
        .await?;

        rows.iter().map(row_to_eligible_item).collect()
    }

    pub async fn get_item_shard(&self, item_id: &str) -> Result<Option<u32>> {
        let shard = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT shard_key FROM source_items WHERE id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool())
        .await?
        .flatten();

        Ok(shard.map(|s| s as u32))
    }

    /// Persist a shard assignment if the item has none yet. The guard makes
    /// the first writer win, so an item never migrates between shards.
    pub async fn assign_item_shard(
        &self,
        item_id: &str,
        shard_key: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE source_items SET shard_key = ?, updated_at = ?
            WHERE id = ? AND shard_key IS NULL
            "#,
        )
        .bind(shard_key as i64)
        .bind(now.to_rfc3339())
        .bind(item_id)
        .execute(&self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Upsert an item row. Used by tests and by the manual enqueue endpoint.
    pub async fn upsert_source_item(
        &self,
        id: &str,
        source: &str,
        url: Option<&str>,
        deadline: Option<DateTime<Utc>>,
        ready: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_items (id, source, url, deadline, ready, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                url = excluded.url,
                deadline = excluded.deadline,
                ready = excluded.ready,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(source)
        .bind(url)
        .bind(deadline.map(|dt| dt.to_rfc3339()))
        .bind(ready)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool())
        .await?;

        Ok(())
    }
}
