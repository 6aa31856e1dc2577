//! # intake-core — Protocol traits for composable data ingestion systems
//!
//! This crate defines the vocabulary shared by every intake crate: the
//! [`Connector`] extraction contract, the record and batch types that flow
//! through the ETL pipeline, the error taxonomy, and the small cross-cutting
//! utilities (cancellation, cron validation, secret redaction, environment
//! configuration) that higher layers agree on.
//!
//! ## The Contract
//!
//! | Boundary | Type | What it does |
//! |----------|------|-------------|
//! | Extraction | [`Connector`] | Uniform connect/test/discover/extract over any transport |
//! | Streaming | [`ExtractStream`] | Reader-paced batch delivery from a running extraction |
//! | Cancellation | [`CancelFlag`] | Set-only stop signal observed between batches |
//!
//! ## Design Principle
//!
//! Every trait here is operation-defined, not mechanism-defined.
//! [`Connector::extract`] means "begin producing finite, ordered batches" —
//! not "run a SQL cursor" or "page an HTTP API." A database pool, a FHIR
//! client, and an object-store lister all implement the same trait, which is
//! what lets the pipeline, scheduler, and worker stay transport-agnostic.
//!
//! ## Dependency Notes
//!
//! Records are `serde_json::Map<String, Value>`. Source schemas are unknown
//! until runtime, so a dynamic value type is the honest representation; the
//! canonical schema layer gives names meaning, not the transport layer.

#![deny(missing_docs)]

pub mod cancel;
pub mod config;
pub mod connector;
pub mod cron;
pub mod error;
pub mod id;
pub mod record;
pub mod redact;

// Re-exports for convenience
pub use cancel::{CancelFlag, WeakCancelFlag};
pub use config::RuntimeConfig;
pub use connector::{
    BatchSender, ColumnInfo, ConnectionTestResult, Connector, ConnectorStatus, ConnectorSubtype,
    ConnectorType, DataType, ExtractStream, SchemaDiscoveryResult, SyncJobStatus, SyncJobType,
    SyncMode, DISCOVERY_SAMPLE_ROWS, DISCOVERY_TABLE_LIMIT,
};
pub use cron::normalize_cron;
pub use error::{ConnectorError, StageError};
pub use id::{ConnectorId, JobId, MappingId};
pub use record::{record_value_string, Batch, Record};
pub use redact::redact_secrets;
