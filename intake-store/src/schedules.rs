//! Durable scheduler job definitions.
//!
//! The scheduler's in-memory triggers are rebuilt from this table on
//! startup, which is what lets schedules survive restarts.

use crate::StoreError;
use chrono::Utc;
use intake_core::ConnectorId;
use sqlx::{Row, SqlitePool};

/// One persisted schedule definition.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    /// Schedule id (one per connector by convention).
    pub id: String,
    /// Connector the schedule syncs.
    pub connector_id: ConnectorId,
    /// Normalized cron expression.
    pub cron_expression: String,
    /// Sync mode for triggered runs.
    pub sync_mode: String,
    /// Whether firing is suspended.
    pub paused: bool,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

/// Repository over the `scheduled_jobs` table.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    /// Open the store, creating its table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id TEXT PRIMARY KEY,
                connector_id TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                sync_mode TEXT NOT NULL,
                paused INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert or replace a schedule definition.
    pub async fn upsert(
        &self,
        id: &str,
        connector_id: &ConnectorId,
        cron_expression: &str,
        sync_mode: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scheduled_jobs (id, connector_id, cron_expression, sync_mode, paused, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(id) DO UPDATE SET
                connector_id = excluded.connector_id,
                cron_expression = excluded.cron_expression,
                sync_mode = excluded.sync_mode",
        )
        .bind(id)
        .bind(connector_id.as_str())
        .bind(cron_expression)
        .bind(sync_mode)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a schedule. Returns whether a row existed.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Pause or resume a schedule. Returns whether a row existed.
    pub async fn set_paused(&self, id: &str, paused: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE scheduled_jobs SET paused = ?1 WHERE id = ?2")
            .bind(i64::from(paused))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch one schedule.
    pub async fn get(&self, id: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM scheduled_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::from_row))
    }

    /// All schedule definitions.
    pub async fn list(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let rows = sqlx::query("SELECT * FROM scheduled_jobs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::from_row).collect())
    }

    fn from_row(row: sqlx::sqlite::SqliteRow) -> ScheduledJob {
        ScheduledJob {
            id: row.get("id"),
            connector_id: ConnectorId::new(row.get::<String, _>("connector_id")),
            cron_expression: row.get("cron_expression"),
            sync_mode: row.get("sync_mode"),
            paused: row.get::<i64, _>("paused") != 0,
            created_at: row.get("created_at"),
        }
    }
}
