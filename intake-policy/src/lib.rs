//! Scheduled ingestion of policy documents into a versioned index.
//!
//! Sources (MLN Matters articles, Internet-Only Manuals, LCD/NCD updates,
//! NCCI edit releases) feed a vector store consumed by an external RAG
//! search surface. Each document carries a stable policy key —
//! `<SOURCE>_<first 12 hex chars of MD5(source_value|title)>` — used
//! strictly as an identifier, never as a security primitive.
//! Re-ingesting a key updates metadata and marks the previous entry
//! non-current; per-source sync state throttles repeat runs.

#![deny(missing_docs)]

pub mod index;
pub mod model;
pub mod sync;

pub use index::{IndexOutcome, PolicyIndex, SqlitePolicyIndex};
pub use model::{policy_key, PolicyDocument, PolicySource, SyncResult};
pub use sync::{AuditEvent, AuditSink, PolicySyncer};

use thiserror::Error;

/// Errors from policy ingestion (crate-local).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The backing index rejected an operation.
    #[error("policy index error: {0}")]
    Index(String),

    /// The sync-state store rejected an operation.
    #[error("sync state error: {0}")]
    State(#[from] sqlx::Error),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
