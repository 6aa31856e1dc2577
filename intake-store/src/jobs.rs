//! Sync job lifecycle persistence: the job manager.
//!
//! Status moves forward only: `pending → running → {success | failed |
//! cancelled}`. Every update that changes status carries its guard in the
//! SQL `WHERE` clause, so a stale writer cannot drag a job backwards.

use crate::StoreError;
use chrono::{Duration, Utc};
use intake_core::{ConnectorId, JobId, SyncJobStatus, SyncJobType, SyncMode};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// A sync job row.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Job id.
    pub id: JobId,
    /// Owning connector.
    pub connector_id: ConnectorId,
    /// How the job was triggered.
    pub job_type: String,
    /// Full or incremental.
    pub sync_mode: String,
    /// Current status.
    pub status: SyncJobStatus,
    /// When the worker picked the job up.
    pub started_at: Option<String>,
    /// When the job reached a terminal state.
    pub completed_at: Option<String>,
    /// Records seen from the source so far.
    pub total_records: i64,
    /// Records that made it through transform and load.
    pub processed_records: i64,
    /// Records that failed a stage.
    pub failed_records: i64,
    /// Watermark recorded on success; seeds the next incremental run.
    pub watermark_value: Option<String>,
    /// Sanitized failure description.
    pub error_message: Option<String>,
    /// Operator or system that triggered the job.
    pub triggered_by: Option<String>,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

/// One entry in a job's append-only log stream.
#[derive(Debug, Clone)]
pub struct JobLogEntry {
    /// Log entry id.
    pub id: String,
    /// Owning job.
    pub job_id: JobId,
    /// Timestamp, RFC 3339.
    pub timestamp: String,
    /// Level (`info`, `warning`, `error`).
    pub level: String,
    /// Message text.
    pub message: String,
    /// Structured context, when any.
    pub context: Option<serde_json::Value>,
}

/// Manager for sync job rows and their log streams.
#[derive(Debug, Clone)]
pub struct JobManager {
    pool: SqlitePool,
}

impl JobManager {
    /// Open the manager, creating its tables if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_jobs (
                id TEXT PRIMARY KEY,
                connector_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                sync_mode TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                started_at TEXT,
                completed_at TEXT,
                total_records INTEGER NOT NULL DEFAULT 0,
                processed_records INTEGER NOT NULL DEFAULT 0,
                failed_records INTEGER NOT NULL DEFAULT 0,
                watermark_value TEXT,
                error_message TEXT,
                triggered_by TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_job_logs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                context TEXT
            )",
        )
        .execute(&pool)
        .await?;
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_sync_jobs_connector ON sync_jobs(connector_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_jobs_status ON sync_jobs(status)",
            "CREATE INDEX IF NOT EXISTS idx_sync_job_logs_job ON sync_job_logs(job_id)",
        ] {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Create a new job in `pending` state.
    pub async fn create_job(
        &self,
        connector_id: &ConnectorId,
        job_type: SyncJobType,
        sync_mode: SyncMode,
        triggered_by: Option<&str>,
    ) -> Result<JobId, StoreError> {
        let job_id = JobId::new(Uuid::new_v4().to_string());
        sqlx::query(
            "INSERT INTO sync_jobs (id, connector_id, job_type, sync_mode, status,
                                    triggered_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(job_id.as_str())
        .bind(connector_id.as_str())
        .bind(job_type.as_str())
        .bind(sync_mode.as_str())
        .bind(SyncJobStatus::Pending.as_str())
        .bind(triggered_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        tracing::info!(job_id = %job_id, connector_id = %connector_id, "created sync job");
        Ok(job_id)
    }

    /// Transition `pending → running`.
    pub async fn start_job(&self, job_id: &JobId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = ?1, started_at = ?2
             WHERE id = ?3 AND status = ?4",
        )
        .bind(SyncJobStatus::Running.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .bind(SyncJobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                entity: format!("sync job {job_id}"),
                detail: "start requires pending status".into(),
            });
        }
        Ok(())
    }

    /// Transition `running → {success | failed}`. The watermark is only
    /// recorded on success.
    pub async fn complete_job(
        &self,
        job_id: &JobId,
        success: bool,
        error_message: Option<&str>,
        watermark_value: Option<&str>,
    ) -> Result<(), StoreError> {
        let status = if success {
            SyncJobStatus::Success
        } else {
            SyncJobStatus::Failed
        };
        let watermark = if success { watermark_value } else { None };
        let result = sqlx::query(
            "UPDATE sync_jobs
             SET status = ?1, completed_at = ?2, error_message = ?3, watermark_value = ?4
             WHERE id = ?5 AND status = ?6",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(error_message)
        .bind(watermark)
        .bind(job_id.as_str())
        .bind(SyncJobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                entity: format!("sync job {job_id}"),
                detail: format!("complete({}) requires running status", status.as_str()),
            });
        }
        tracing::info!(job_id = %job_id, status = %status, "completed sync job");
        Ok(())
    }

    /// Cancel a pending or running job. Returns whether a row changed.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = ?1, completed_at = ?2, error_message = ?3
             WHERE id = ?4 AND status IN (?5, ?6)",
        )
        .bind(SyncJobStatus::Cancelled.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind("Cancelled by user")
        .bind(job_id.as_str())
        .bind(SyncJobStatus::Pending.as_str())
        .bind(SyncJobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update the monotonically non-decreasing progress counters.
    pub async fn update_progress(
        &self,
        job_id: &JobId,
        total_records: i64,
        processed_records: i64,
        failed_records: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_jobs
             SET total_records = ?1, processed_records = ?2, failed_records = ?3
             WHERE id = ?4",
        )
        .bind(total_records)
        .bind(processed_records)
        .bind(failed_records)
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one job.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<SyncJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE id = ?1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::job_from_row).transpose()
    }

    /// List jobs, optionally filtered, newest first.
    pub async fn list_jobs(
        &self,
        connector_id: Option<&ConnectorId>,
        status: Option<SyncJobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let mut sql = String::from("SELECT * FROM sync_jobs WHERE 1=1");
        if connector_id.is_some() {
            sql.push_str(" AND connector_id = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(connector_id) = connector_id {
            query = query.bind(connector_id.as_str().to_string());
        }
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::job_from_row).collect()
    }

    /// Currently running jobs, optionally for one connector.
    pub async fn running_jobs(
        &self,
        connector_id: Option<&ConnectorId>,
    ) -> Result<Vec<SyncJob>, StoreError> {
        self.list_jobs(connector_id, Some(SyncJobStatus::Running), 50, 0)
            .await
    }

    /// Append one entry to a job's log stream.
    pub async fn add_log(
        &self,
        job_id: &JobId,
        level: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let context_json = context
            .map(|c| serde_json::to_string(&c))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO sync_job_logs (id, job_id, timestamp, level, message, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(job_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(level)
        .bind(message)
        .bind(context_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read a job's log stream in append order.
    pub async fn logs(
        &self,
        job_id: &JobId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobLogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM sync_job_logs WHERE job_id = ?1
             ORDER BY timestamp ASC LIMIT ?2 OFFSET ?3",
        )
        .bind(job_id.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let context = row
                    .get::<Option<String>, _>("context")
                    .map(|c| serde_json::from_str(&c))
                    .transpose()
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(JobLogEntry {
                    id: row.get("id"),
                    job_id: JobId::new(row.get::<String, _>("job_id")),
                    timestamp: row.get("timestamp"),
                    level: row.get("level"),
                    message: row.get("message"),
                    context,
                })
            })
            .collect()
    }

    /// Watermark from the most recent successful job for a connector.
    pub async fn last_successful_watermark(
        &self,
        connector_id: &ConnectorId,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT watermark_value FROM sync_jobs
             WHERE connector_id = ?1 AND status = ?2 AND watermark_value IS NOT NULL
             ORDER BY completed_at DESC
             LIMIT 1",
        )
        .bind(connector_id.as_str())
        .bind(SyncJobStatus::Success.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("watermark_value")))
    }

    /// Delete terminal jobs older than `days`, logs first. Returns the
    /// number of job rows removed.
    pub async fn cleanup_old_jobs(&self, days: i64) -> Result<u64, StoreError> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        sqlx::query(
            "DELETE FROM sync_job_logs WHERE job_id IN (
                SELECT id FROM sync_jobs
                WHERE completed_at < ?1 AND status IN (?2, ?3, ?4)
            )",
        )
        .bind(&cutoff)
        .bind(SyncJobStatus::Success.as_str())
        .bind(SyncJobStatus::Failed.as_str())
        .bind(SyncJobStatus::Cancelled.as_str())
        .execute(&self.pool)
        .await?;
        let result = sqlx::query(
            "DELETE FROM sync_jobs
             WHERE completed_at < ?1 AND status IN (?2, ?3, ?4)",
        )
        .bind(&cutoff)
        .bind(SyncJobStatus::Success.as_str())
        .bind(SyncJobStatus::Failed.as_str())
        .bind(SyncJobStatus::Cancelled.as_str())
        .execute(&self.pool)
        .await?;
        let deleted = result.rows_affected();
        tracing::info!(deleted, "cleaned up old sync jobs");
        Ok(deleted)
    }

    fn job_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SyncJob, StoreError> {
        let status_text: String = row.get("status");
        let status = SyncJobStatus::parse(&status_text)
            .ok_or_else(|| StoreError::Serialization(format!("unknown status {status_text}")))?;
        Ok(SyncJob {
            id: JobId::new(row.get::<String, _>("id")),
            connector_id: ConnectorId::new(row.get::<String, _>("connector_id")),
            job_type: row.get("job_type"),
            sync_mode: row.get("sync_mode"),
            status,
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            total_records: row.get("total_records"),
            processed_records: row.get("processed_records"),
            failed_records: row.get("failed_records"),
            watermark_value: row.get("watermark_value"),
            error_message: row.get("error_message"),
            triggered_by: row.get("triggered_by"),
            created_at: row.get("created_at"),
        })
    }
}
