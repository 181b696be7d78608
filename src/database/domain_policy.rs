//! Domain health bookkeeping for the circuit breaker

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{parse_datetime, Database};
use crate::models::DomainPolicy;

fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<DomainPolicy> {
    let blocked_until = row
        .get::<Option<String>, _>("blocked_until")
        .map(|s| parse_datetime(&s))
        .transpose()?;

    Ok(DomainPolicy {
        domain_key: row.get("domain_key"),
        consecutive_failures: row.get::<i64, _>("consecutive_failures") as u32,
        blocked_until,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
    })
}

impl Database {
    pub async fn get_domain_policy(&self, domain_key: &str) -> Result<Option<DomainPolicy>> {
        let row = sqlx::query(
            r#"
            SELECT domain_key, consecutive_failures, blocked_until, created_at, updated_at
            FROM domain_policy WHERE domain_key = ?
            "#,
        )
        .bind(domain_key)
        .fetch_optional(&self.pool())
        .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    /// Record one more failure against a domain, setting the block window
    /// when the caller decided the threshold was crossed.
    ///
    /// Returns the counter value after the increment.
    pub async fn record_domain_failure(
        &self,
        domain_key: &str,
        blocked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        sqlx::query(
            r#"
            INSERT INTO domain_policy (domain_key, consecutive_failures, blocked_until, created_at, updated_at)
            VALUES (?, 1, ?, ?, ?)
            ON CONFLICT(domain_key) DO UPDATE SET
                consecutive_failures = consecutive_failures + 1,
                blocked_until = COALESCE(excluded.blocked_until, domain_policy.blocked_until),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(domain_key)
        .bind(blocked_until.map(|dt| dt.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool())
        .await?;

        let failures = sqlx::query_scalar::<_, i64>(
            "SELECT consecutive_failures FROM domain_policy WHERE domain_key = ?",
        )
        .bind(domain_key)
        .fetch_one(&self.pool())
        .await?;

        Ok(failures as u32)
    }

    /// Extend a domain's block window after its failure streak crossed the
    /// threshold.
    pub async fn set_domain_blocked_until(
        &self,
        domain_key: &str,
        blocked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE domain_policy SET blocked_until = ?, updated_at = ? WHERE domain_key = ?",
        )
        .bind(blocked_until.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(domain_key)
        .execute(&self.pool())
        .await?;

        Ok(())
    }

    /// Reset the failure streak after a success. An active block window is
    /// deliberately left in place until it expires on its own.
    pub async fn reset_domain_failures(&self, domain_key: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE domain_policy SET consecutive_failures = 0, updated_at = ? WHERE domain_key = ?",
        )
        .bind(now.to_rfc3339())
        .bind(domain_key)
        .execute(&self.pool())
        .await?;

        Ok(())
    }

    /// True when the domain is inside an active block window.
    pub async fn is_domain_blocked(&self, domain_key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get_domain_policy(domain_key)
            .await?
            .map(|policy| policy.is_blocked(now))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_db() -> Database {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_failures_accumulate_per_domain() {
        let db = test_db().await;
        let now = Utc::now();

        assert_eq!(db.record_domain_failure("example.org", None, now).await.unwrap(), 1);
        assert_eq!(db.record_domain_failure("example.org", None, now).await.unwrap(), 2);
        assert_eq!(db.record_domain_failure("other.org", None, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_streak_but_not_block() {
        let db = test_db().await;
        let now = Utc::now();
        let until = now + Duration::hours(24);

        db.record_domain_failure("example.org", None, now).await.unwrap();
        db.record_domain_failure("example.org", None, now).await.unwrap();
        db.record_domain_failure("example.org", Some(until), now).await.unwrap();
        assert!(db.is_domain_blocked("example.org", now).await.unwrap());

        db.reset_domain_failures("example.org", now).await.unwrap();
        let policy = db.get_domain_policy("example.org").await.unwrap().unwrap();
        assert_eq!(policy.consecutive_failures, 0);
        // Block stays until it times out
        assert!(db.is_domain_blocked("example.org", now).await.unwrap());
        assert!(!db
            .is_domain_blocked("example.org", until + Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_domain_is_not_blocked() {
        let db = test_db().await;
        assert!(!db.is_domain_blocked("nowhere.test", Utc::now()).await.unwrap());
    }
}
