//! SQLite state store for the ingestion engine.
//!
//! One database file (addressed by `DB_PATH`) backs every process-wide
//! concern: connector records, sync jobs and their log streams, versioned
//! schema mappings with an audit trail, durable scheduler definitions, and
//! fraud-analysis results. Each repository creates its own tables
//! idempotently on construction, and all writes are single-statement
//! atomic operations.

#![deny(missing_docs)]

pub mod connectors;
pub mod jobs;
pub mod mappings;
pub mod results;
pub mod schedules;

pub use connectors::{ConnectorRecord, ConnectorRepository};
pub use jobs::{JobLogEntry, JobManager, SyncJob};
pub use mappings::{
    AuditLogEntry, FieldMappingEntry, MappingAction, MappingMethod, MappingStatus, MappingStore,
    SchemaMapping,
};
pub use results::{sync_result_key, AnalysisResult, AnalysisResultStore};
pub use schedules::{ScheduleStore, ScheduledJob};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use thiserror::Error;

/// Errors from the state store (crate-local).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted JSON column could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A status change violated the forward-only transition rules.
    #[error("invalid transition for {entity}: {detail}")]
    InvalidTransition {
        /// Entity the transition was attempted on.
        entity: String,
        /// What was attempted.
        detail: String,
    },

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Shared handle to the state database.
#[derive(Debug, Clone)]
pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    /// Open (creating if missing) the state database at the given path.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(StoreError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every
    /// handle on the same memory store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Borrow the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
