//! SQLite activity timeline (finished run logs)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::{RunLogEntry, RunLogRepository, RunLogSink};

/// SQLite implementation of RunLogRepository
pub struct SqliteRunLogRepository {
    pool: SqlitePool,
}

impl SqliteRunLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<RunLogEntry> {
        let created_at: String = row.try_get("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| anyhow!("Failed to parse created_at: {}", e))?
            .with_timezone(&Utc);

        let details: String = row.try_get("details")?;
        let details = serde_json::from_str(&details)
            .map_err(|e| anyhow!("Failed to parse run log details: {}", e))?;

        Ok(RunLogEntry {
            id: row.try_get("id")?,
            scope: row.try_get("scope")?,
            items_processed: row.try_get::<i64, _>("items_processed")? as u32,
            items_updated: row.try_get::<i64, _>("items_updated")? as u32,
            items_skipped: row.try_get::<i64, _>("items_skipped")? as u32,
            message: row.try_get("message")?,
            details,
            elapsed_ms: row.try_get::<i64, _>("elapsed_ms")? as u64,
            created_at,
        })
    }
}

#[async_trait]
impl RunLogSink for SqliteRunLogRepository {
    async fn persist(&self, entry: &RunLogEntry) -> Result<()> {
        let details_json = serde_json::to_string(&entry.details)?;

        sqlx::query(
            r"
            INSERT INTO run_logs (
                id, scope, items_processed, items_updated, items_skipped,
                message, details, elapsed_ms, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&entry.id)
        .bind(&entry.scope)
        .bind(i64::from(entry.items_processed))
        .bind(i64::from(entry.items_updated))
        .bind(i64::from(entry.items_skipped))
        .bind(&entry.message)
        .bind(details_json)
        .bind(entry.elapsed_ms as i64)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RunLogRepository for SqliteRunLogRepository {
    async fn get_entry(&self, id: &str) -> Result<Option<RunLogEntry>> {
        let row = sqlx::query(
            r"
            SELECT id, scope, items_processed, items_updated, items_skipped,
                   message, details, elapsed_ms, created_at
            FROM run_logs
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn recent_entries(&self, limit: u32) -> Result<Vec<RunLogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, scope, items_processed, items_updated, items_skipped,
                   message, details, elapsed_ms, created_at
            FROM run_logs
            ORDER BY created_at DESC
            LIMIT ?
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM run_logs WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
