#![deny(missing_docs)]
//! # intake — umbrella crate
//!
//! Provides a single import surface for the intake ingestion engine.
//! Re-exports the protocol crate and key implementations behind feature
//! flags, plus a `prelude` for the happy path.

pub use intake_core;

#[cfg(feature = "connector-db")]
pub use intake_connector_db;
#[cfg(feature = "connector-file")]
pub use intake_connector_file;
#[cfg(feature = "connector-http")]
pub use intake_connector_http;
#[cfg(feature = "connectors")]
pub use intake_connectors;
#[cfg(feature = "credentials")]
pub use intake_credentials;
#[cfg(feature = "etl")]
pub use intake_etl;
#[cfg(feature = "llm")]
pub use intake_llm;
#[cfg(feature = "mapper")]
pub use intake_mapper;
#[cfg(feature = "policy")]
pub use intake_policy;
#[cfg(feature = "rules")]
pub use intake_rules;
#[cfg(feature = "scheduler")]
pub use intake_scheduler;
#[cfg(feature = "schema")]
pub use intake_schema;
#[cfg(feature = "store")]
pub use intake_store;

/// Happy-path imports for composing ingestion systems.
pub mod prelude {
    pub use intake_core::{
        CancelFlag, Connector, ConnectorError, ConnectorId, ConnectorSubtype, ConnectorType,
        DataType, ExtractStream, JobId, Record, RuntimeConfig, SyncJobStatus, SyncJobType,
        SyncMode,
    };

    #[cfg(feature = "schema")]
    pub use intake_schema::{resolve_alias, required_fields, CLAIMS_SCHEMA};

    #[cfg(feature = "credentials")]
    pub use intake_credentials::{secret_fields, CredentialStore};

    #[cfg(feature = "store")]
    pub use intake_store::{ConnectorRepository, JobManager, MappingStore, StateDb};

    #[cfg(feature = "mapper")]
    pub use intake_mapper::{FieldMapper, SemanticMatcher};

    #[cfg(feature = "connectors")]
    pub use intake_connectors::ConnectorRegistry;

    #[cfg(feature = "etl")]
    pub use intake_etl::{EtlContext, ExtractStage, LoadStage, Pipeline, TransformStage};

    #[cfg(feature = "rules")]
    pub use intake_rules::{evaluate, ReferenceData, RuleConfig, ThresholdConfig};

    #[cfg(feature = "scheduler")]
    pub use intake_scheduler::{SyncScheduler, SyncWorker};

    #[cfg(feature = "policy")]
    pub use intake_policy::{PolicyDocument, PolicySource, PolicySyncer};
}
