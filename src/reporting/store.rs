//! Persistent, deduplicated abuse accounting
//!
//! One row per anonymized identity. Rows are created on the first violation and
//! incremented in place afterwards; this subsystem never deletes them.

use super::ViolationReport;
use crate::database::queries;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{Row, sqlite::SqlitePool, sqlite::SqliteRow};

/// A persisted abuse report row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbuseReport {
    pub anonymized_id: String,
    pub coarse_address: String,
    pub target_product_id: i64,
    pub target_button_id: i64,
    pub total_attempts: i64,
    pub first_attempt: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
}

impl AbuseReport {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            anonymized_id: row.try_get("anonymized_id")?,
            coarse_address: row.try_get("coarse_address")?,
            target_product_id: row.try_get("target_product_id")?,
            target_button_id: row.try_get("target_button_id")?,
            total_attempts: row.try_get("total_attempts")?,
            first_attempt: parse_timestamp(row, "first_attempt")?,
            last_attempt: parse_timestamp(row, "last_attempt")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AbuseReportStore {
    pool: SqlitePool,
}

impl AbuseReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record one violation: create the row with `initial_attempts`, or increment
    /// `total_attempts` and move `last_attempt` forward when it already exists.
    pub async fn upsert(&self, report: &ViolationReport) -> Result<(), sqlx::Error> {
        queries::upsert_abuse_report(
            &self.pool,
            &report.anonymized_id,
            &report.coarse_address,
            report.target.product_id,
            report.target.button_id,
            report.initial_attempts,
            &format_timestamp(report.observed_at),
        )
        .await?;
        Ok(())
    }

    pub async fn fetch(&self, anonymized_id: &str) -> Result<Option<AbuseReport>, sqlx::Error> {
        queries::fetch_abuse_report_by_id(&self.pool, anonymized_id)
            .await?
            .as_ref()
            .map(AbuseReport::from_row)
            .transpose()
    }

    /// Most recently active reports first
    pub async fn recent(&self, limit: i64) -> Result<Vec<AbuseReport>, sqlx::Error> {
        queries::fetch_recent_abuse_reports(&self.pool, limit)
            .await?
            .iter()
            .map(AbuseReport::from_row)
            .collect()
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        queries::count_abuse_reports(&self.pool).await
    }
}

/// Fixed-width UTC form, so stored timestamps compare correctly as text
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use crate::reporting::correlation::ReportTarget;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_store() -> AbuseReportStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        DatabaseManager::new(pool.clone())
            .apply_pending_migrations()
            .await
            .expect("Failed to apply migrations");
        AbuseReportStore::new(pool)
    }

    fn report(id: &str, minute: u32) -> ViolationReport {
        ViolationReport {
            anonymized_id: id.to_string(),
            coarse_address: "198.51.100.0".to_string(),
            target: ReportTarget {
                product_id: 12,
                button_id: 34,
            },
            initial_attempts: 6,
            observed_at: Utc.with_ymd_and_hms(2024, 3, 14, 9, minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_first_violation_creates_row() {
        let store = create_test_store().await;
        store.upsert(&report("abc", 5)).await.unwrap();

        let row = store.fetch("abc").await.unwrap().expect("row should exist");
        // six, not one: a new row starts at the count that crossed the limit (limit + 1)
        assert_eq!(row.total_attempts, 6);
        assert_eq!(row.coarse_address, "198.51.100.0");
        assert_eq!(row.target_product_id, 12);
        assert_eq!(row.target_button_id, 34);
        assert_eq!(row.first_attempt, row.last_attempt);
    }

    #[tokio::test]
    async fn test_repeat_violation_increments_in_place() {
        let store = create_test_store().await;
        store.upsert(&report("abc", 5)).await.unwrap();
        store.upsert(&report("abc", 7)).await.unwrap();
        store.upsert(&report("abc", 9)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let row = store.fetch("abc").await.unwrap().unwrap();
        assert_eq!(row.total_attempts, 8);
        assert_eq!(row.first_attempt, Utc.with_ymd_and_hms(2024, 3, 14, 9, 5, 0).unwrap());
        assert_eq!(row.last_attempt, Utc.with_ymd_and_hms(2024, 3, 14, 9, 9, 0).unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_first_violations_produce_one_row() {
        let store = create_test_store().await;
        let mut handles = Vec::new();
        for minute in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(&report("race", minute)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 1);
        let row = store.fetch("race").await.unwrap().unwrap();
        assert_eq!(row.total_attempts, 6 + 9);
    }

    #[tokio::test]
    async fn test_recent_orders_by_last_attempt() {
        let store = create_test_store().await;
        store.upsert(&report("older", 1)).await.unwrap();
        store.upsert(&report("newer", 30)).await.unwrap();

        let rows = store.recent(10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.anonymized_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(store.recent(1).await.unwrap().len(), 1);
        assert!(store.fetch("missing").await.unwrap().is_none());
    }
}
