//! Connector record persistence.

use crate::StoreError;
use chrono::Utc;
use intake_core::{ConnectorId, ConnectorStatus, Record};
use sqlx::{Row, SqlitePool};

/// A configured connector as persisted. The connection config carries only
/// placeholder sentinels where secrets belong; ciphertext lives in the
/// credential store.
#[derive(Debug, Clone)]
pub struct ConnectorRecord {
    /// Stable connector id.
    pub id: ConnectorId,
    /// Human-readable name.
    pub name: String,
    /// Transport family (`database`, `api`, `file`).
    pub connector_type: String,
    /// Concrete subtype (`postgresql`, `rest`, `s3`, …).
    pub subtype: String,
    /// Healthcare data domain (`claims`, `eligibility`, …).
    pub data_type: String,
    /// Sanitized connection configuration.
    pub connection_config: Record,
    /// Optional cron schedule.
    pub sync_schedule: Option<String>,
    /// Default sync mode for scheduled runs.
    pub sync_mode: String,
    /// Records per extraction batch.
    pub batch_size: i64,
    /// Lifecycle status.
    pub status: String,
    /// Completion time of the most recent sync, RFC 3339.
    pub last_sync_at: Option<String>,
    /// Terminal status of the most recent sync.
    pub last_sync_status: Option<String>,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Operator who created the connector.
    pub created_by: Option<String>,
}

/// Repository over the `connectors` table.
#[derive(Debug, Clone)]
pub struct ConnectorRepository {
    pool: SqlitePool,
}

impl ConnectorRepository {
    /// Open the repository, creating its table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS connectors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                connector_type TEXT NOT NULL,
                subtype TEXT NOT NULL,
                data_type TEXT NOT NULL,
                connection_config TEXT NOT NULL,
                sync_schedule TEXT,
                sync_mode TEXT NOT NULL DEFAULT 'incremental',
                batch_size INTEGER NOT NULL DEFAULT 1000,
                status TEXT NOT NULL DEFAULT 'active',
                last_sync_at TEXT,
                last_sync_status TEXT,
                created_at TEXT NOT NULL,
                created_by TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert a new connector record.
    pub async fn insert(&self, record: &ConnectorRecord) -> Result<(), StoreError> {
        let config = serde_json::to_string(&record.connection_config)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO connectors
                (id, name, connector_type, subtype, data_type, connection_config,
                 sync_schedule, sync_mode, batch_size, status, last_sync_at,
                 last_sync_status, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(&record.connector_type)
        .bind(&record.subtype)
        .bind(&record.data_type)
        .bind(&config)
        .bind(&record.sync_schedule)
        .bind(&record.sync_mode)
        .bind(record.batch_size)
        .bind(&record.status)
        .bind(&record.last_sync_at)
        .bind(&record.last_sync_status)
        .bind(&record.created_at)
        .bind(&record.created_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one connector by id.
    pub async fn get(&self, id: &ConnectorId) -> Result<Option<ConnectorRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM connectors WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::from_row).transpose()
    }

    /// List all connectors, newest first.
    pub async fn list(&self) -> Result<Vec<ConnectorRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM connectors ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    /// Update the lifecycle status.
    pub async fn set_status(
        &self,
        id: &ConnectorId,
        status: ConnectorStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE connectors SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of the most recent sync.
    pub async fn update_sync_status(
        &self,
        id: &ConnectorId,
        last_sync_status: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE connectors SET last_sync_at = ?1, last_sync_status = ?2 WHERE id = ?3",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(last_sync_status)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a connector record. Returns whether a row was removed.
    pub async fn delete(&self, id: &ConnectorId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM connectors WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<ConnectorRecord, StoreError> {
        let config: String = row.get("connection_config");
        let connection_config: Record = serde_json::from_str(&config)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(ConnectorRecord {
            id: ConnectorId::new(row.get::<String, _>("id")),
            name: row.get("name"),
            connector_type: row.get("connector_type"),
            subtype: row.get("subtype"),
            data_type: row.get("data_type"),
            connection_config,
            sync_schedule: row.get("sync_schedule"),
            sync_mode: row.get("sync_mode"),
            batch_size: row.get("batch_size"),
            status: row.get("status"),
            last_sync_at: row.get("last_sync_at"),
            last_sync_status: row.get("last_sync_status"),
            created_at: row.get("created_at"),
            created_by: row.get("created_by"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateDb;
    use serde_json::json;

    fn sample(id: &str) -> ConnectorRecord {
        let mut config = Record::new();
        config.insert("host".into(), json!("db.internal"));
        config.insert("password".into(), json!("***ENCRYPTED***"));
        ConnectorRecord {
            id: ConnectorId::new(id),
            name: "claims feed".into(),
            connector_type: "database".into(),
            subtype: "postgresql".into(),
            data_type: "claims".into(),
            connection_config: config,
            sync_schedule: Some("0 */6 * * *".into()),
            sync_mode: "incremental".into(),
            batch_size: 1000,
            status: "active".into(),
            last_sync_at: None,
            last_sync_status: None,
            created_at: Utc::now().to_rfc3339(),
            created_by: Some("ops".into()),
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let db = StateDb::in_memory().await.unwrap();
        let repo = ConnectorRepository::new(db.pool().clone()).await.unwrap();
        repo.insert(&sample("c1")).await.unwrap();

        let fetched = repo.get(&ConnectorId::new("c1")).await.unwrap().unwrap();
        assert_eq!(fetched.name, "claims feed");
        assert_eq!(fetched.subtype, "postgresql");
        assert_eq!(fetched.connection_config["host"], json!("db.internal"));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let db = StateDb::in_memory().await.unwrap();
        let repo = ConnectorRepository::new(db.pool().clone()).await.unwrap();
        assert!(repo.get(&ConnectorId::new("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_status_update() {
        let db = StateDb::in_memory().await.unwrap();
        let repo = ConnectorRepository::new(db.pool().clone()).await.unwrap();
        repo.insert(&sample("c1")).await.unwrap();

        repo.update_sync_status(&ConnectorId::new("c1"), "success")
            .await
            .unwrap();
        let fetched = repo.get(&ConnectorId::new("c1")).await.unwrap().unwrap();
        assert_eq!(fetched.last_sync_status.as_deref(), Some("success"));
        assert!(fetched.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let db = StateDb::in_memory().await.unwrap();
        let repo = ConnectorRepository::new(db.pool().clone()).await.unwrap();
        repo.insert(&sample("c1")).await.unwrap();
        assert!(repo.delete(&ConnectorId::new("c1")).await.unwrap());
        assert!(!repo.delete(&ConnectorId::new("c1")).await.unwrap());
    }
}
