//! The connector extraction contract and its data types.
//!
//! A connector wraps one transport (database pool, HTTP client, object
//! store) behind a uniform capability set: connect, disconnect, test,
//! discover, extract, watermark. Instances are created per extraction and
//! disposed when the owning job completes; a single instance is driven by
//! at most one extraction at a time, which is why the mutating operations
//! take `&mut self`.

use crate::error::ConnectorError;
use crate::id::ConnectorId;
use crate::record::{Batch, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

/// Schema discovery is bounded: at most this many tables are inspected.
pub const DISCOVERY_TABLE_LIMIT: usize = 20;

/// Schema discovery samples at most this many rows per table.
pub const DISCOVERY_SAMPLE_ROWS: usize = 3;

/// How a sync run reads from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Read everything the source offers.
    Full,
    /// Read only records past the previous run's watermark.
    Incremental,
}

impl SyncMode {
    /// Stable string form used in persisted job records.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }

    /// Parse the persisted string form. Unknown values fall back to full —
    /// a full sync is always safe, an accidental incremental is not.
    pub fn parse(s: &str) -> Self {
        match s {
            "incremental" => SyncMode::Incremental,
            _ => SyncMode::Full,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport family of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    /// Relational databases (PostgreSQL, MySQL, SQL Server).
    Database,
    /// HTTP APIs (generic REST, FHIR).
    Api,
    /// File and object stores (S3, SFTP, Azure Blob, local).
    File,
}

impl ConnectorType {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Database => "database",
            ConnectorType::Api => "api",
            ConnectorType::File => "file",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete connector implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorSubtype {
    /// PostgreSQL over a pooled driver.
    Postgresql,
    /// MySQL over a pooled driver.
    Mysql,
    /// Microsoft SQL Server over TDS.
    Sqlserver,
    /// Generic paginated REST API.
    Rest,
    /// FHIR R4 server with Bundle pagination.
    Fhir,
    /// Amazon S3 (and compatible) object storage.
    S3,
    /// SFTP file drop.
    Sftp,
    /// Azure Blob Storage container.
    AzureBlob,
    /// Local filesystem directory.
    Local,
}

impl ConnectorSubtype {
    /// Stable string form used in persisted connector records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorSubtype::Postgresql => "postgresql",
            ConnectorSubtype::Mysql => "mysql",
            ConnectorSubtype::Sqlserver => "sqlserver",
            ConnectorSubtype::Rest => "rest",
            ConnectorSubtype::Fhir => "fhir",
            ConnectorSubtype::S3 => "s3",
            ConnectorSubtype::Sftp => "sftp",
            ConnectorSubtype::AzureBlob => "azure_blob",
            ConnectorSubtype::Local => "local",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "postgresql" => Some(ConnectorSubtype::Postgresql),
            "mysql" => Some(ConnectorSubtype::Mysql),
            "sqlserver" => Some(ConnectorSubtype::Sqlserver),
            "rest" => Some(ConnectorSubtype::Rest),
            "fhir" => Some(ConnectorSubtype::Fhir),
            "s3" => Some(ConnectorSubtype::S3),
            "sftp" => Some(ConnectorSubtype::Sftp),
            "azure_blob" => Some(ConnectorSubtype::AzureBlob),
            "local" => Some(ConnectorSubtype::Local),
            _ => None,
        }
    }

    /// The transport family this subtype belongs to.
    pub fn connector_type(&self) -> ConnectorType {
        match self {
            ConnectorSubtype::Postgresql
            | ConnectorSubtype::Mysql
            | ConnectorSubtype::Sqlserver => ConnectorType::Database,
            ConnectorSubtype::Rest | ConnectorSubtype::Fhir => ConnectorType::Api,
            ConnectorSubtype::S3
            | ConnectorSubtype::Sftp
            | ConnectorSubtype::AzureBlob
            | ConnectorSubtype::Local => ConnectorType::File,
        }
    }
}

impl fmt::Display for ConnectorSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Healthcare data domain a connector feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Medical/institutional claims.
    Claims,
    /// Member eligibility and coverage periods.
    Eligibility,
    /// Provider roster and credentialing data.
    Providers,
    /// Reference data (code sets, fee schedules).
    Reference,
}

impl DataType {
    /// Stable string form; also names the target table suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Claims => "claims",
            DataType::Eligibility => "eligibility",
            DataType::Providers => "providers",
            DataType::Reference => "reference",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claims" => Some(DataType::Claims),
            "eligibility" => Some(DataType::Eligibility),
            "providers" => Some(DataType::Providers),
            "reference" => Some(DataType::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a configured connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    /// Eligible for scheduled and manual syncs.
    Active,
    /// Configured but not syncing.
    Inactive,
    /// Last operation failed; operator attention needed.
    Error,
    /// Under connection testing.
    Testing,
}

impl ConnectorStatus {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Active => "active",
            ConnectorStatus::Inactive => "inactive",
            ConnectorStatus::Error => "error",
            ConnectorStatus::Testing => "testing",
        }
    }
}

/// Terminal and in-flight states of a sync job.
///
/// Transitions only move forward: `pending → running → {success | failed |
/// cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    /// Created, not yet picked up by a worker.
    Pending,
    /// Owned by exactly one worker.
    Running,
    /// Completed with zero fatal errors; watermark recorded.
    Success,
    /// Terminated by an extraction failure or fatal error.
    Failed,
    /// Cancellation observed between batches.
    Cancelled,
}

impl SyncJobStatus {
    /// Stable string form used in the `sync_jobs` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobStatus::Pending => "pending",
            SyncJobStatus::Running => "running",
            SyncJobStatus::Success => "success",
            SyncJobStatus::Failed => "failed",
            SyncJobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncJobStatus::Pending),
            "running" => Some(SyncJobStatus::Running),
            "success" => Some(SyncJobStatus::Success),
            "failed" => Some(SyncJobStatus::Failed),
            "cancelled" => Some(SyncJobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncJobStatus::Success | SyncJobStatus::Failed | SyncJobStatus::Cancelled
        )
    }
}

impl fmt::Display for SyncJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sync job was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobType {
    /// Fired by the cron scheduler.
    Scheduled,
    /// Requested by an operator or API call.
    Manual,
}

impl SyncJobType {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobType::Scheduled => "scheduled",
            SyncJobType::Manual => "manual",
        }
    }
}

/// Result of testing a connector's connection.
///
/// `test_connection` never keeps the connection open and never returns an
/// error — failure is data, carried in `success` and `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    /// Whether the probe succeeded.
    pub success: bool,
    /// Human-readable outcome, sanitized of secrets.
    pub message: String,
    /// Round-trip latency, when the probe got far enough to measure one.
    pub latency_ms: Option<f64>,
    /// Transport-specific detail (driver, table counts, status codes).
    pub details: serde_json::Value,
}

impl ConnectionTestResult {
    /// A successful probe.
    pub fn ok(message: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: Some(latency_ms),
            details: serde_json::Value::Object(Default::default()),
        }
    }

    /// A failed probe.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: None,
            details: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attach transport-specific detail.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A column discovered on a source table or resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column or field name as the source reports it.
    pub name: String,
    /// Source-reported type name.
    pub data_type: String,
    /// Whether the source allows nulls (true when unknown).
    pub nullable: bool,
}

/// Bounded snapshot of a source's shape: first [`DISCOVERY_TABLE_LIMIT`]
/// tables, first [`DISCOVERY_SAMPLE_ROWS`] rows each.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDiscoveryResult {
    /// Table (or resource) names.
    pub tables: Vec<String>,
    /// Columns per inspected table.
    pub columns: HashMap<String, Vec<ColumnInfo>>,
    /// Sample rows per inspected table.
    pub sample_data: HashMap<String, Vec<Record>>,
}

/// Reader-paced stream of extraction batches.
///
/// The producing side runs in its own task and blocks once the bounded
/// channel is full, so a slow loader naturally throttles a fast source.
/// The stream is finite and not restartable: once `next_batch` returns
/// `None`, the extraction is over.
pub struct ExtractStream {
    receiver: mpsc::Receiver<Result<Batch, ConnectorError>>,
}

impl ExtractStream {
    /// Channel capacity: the producer may run at most this many batches
    /// ahead of the consumer.
    pub const BUFFERED_BATCHES: usize = 2;

    /// Create a paired sender and stream.
    pub fn channel() -> (BatchSender, ExtractStream) {
        let (sender, receiver) = mpsc::channel(Self::BUFFERED_BATCHES);
        (BatchSender { sender }, ExtractStream { receiver })
    }

    /// Receive the next batch, or the terminal error, or `None` when the
    /// extraction has finished cleanly.
    pub async fn next_batch(&mut self) -> Option<Result<Batch, ConnectorError>> {
        self.receiver.recv().await
    }
}

impl fmt::Debug for ExtractStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtractStream")
    }
}

/// Producing half of an [`ExtractStream`], owned by the extraction task.
#[derive(Clone)]
pub struct BatchSender {
    sender: mpsc::Sender<Result<Batch, ConnectorError>>,
}

impl BatchSender {
    /// Deliver a batch. Returns `false` when the reader has gone away,
    /// which the producer should treat as a stop signal.
    pub async fn send(&self, batch: Batch) -> bool {
        self.sender.send(Ok(batch)).await.is_ok()
    }

    /// Deliver the terminal extraction error. The stream ends after this.
    pub async fn fail(&self, error: ConnectorError) -> bool {
        self.sender.send(Err(error)).await.is_ok()
    }
}

impl fmt::Debug for BatchSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BatchSender")
    }
}

/// Uniform extraction contract over one transport.
///
/// Implementations: `PostgresConnector`, `MysqlConnector`,
/// `SqlServerConnector`, `RestConnector`, `FhirConnector`, `FileConnector`.
///
/// Lifecycle: `connect` and `disconnect` are idempotent; `disconnect` is
/// invoked on every exit path, including cancellation, and therefore must
/// not fail. A connector never outlives its enclosing job.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier of the configured connector.
    fn connector_id(&self) -> &ConnectorId;

    /// Human-readable connector name.
    fn name(&self) -> &str;

    /// Establish the transport. Idempotent; may block on I/O.
    async fn connect(&mut self) -> Result<(), ConnectorError>;

    /// Release transport resources. Idempotent; never fails.
    async fn disconnect(&mut self);

    /// Probe the source without keeping a connection open.
    async fn test_connection(&self) -> ConnectionTestResult;

    /// Discover tables, columns, and bounded sample rows.
    async fn discover_schema(&mut self) -> Result<SchemaDiscoveryResult, ConnectorError>;

    /// Begin extracting. Batches arrive through the returned stream in the
    /// source's natural order; the stream is finite and not restartable
    /// within a run.
    async fn extract(
        &mut self,
        mode: SyncMode,
        watermark: Option<String>,
    ) -> Result<ExtractStream, ConnectorError>;

    /// The source's current high watermark, when the transport can compute
    /// one (e.g. `MAX(watermark_column)` for databases, newest modification
    /// time for file drops).
    async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_family_assignment() {
        assert_eq!(
            ConnectorSubtype::Postgresql.connector_type(),
            ConnectorType::Database
        );
        assert_eq!(ConnectorSubtype::Fhir.connector_type(), ConnectorType::Api);
        assert_eq!(
            ConnectorSubtype::AzureBlob.connector_type(),
            ConnectorType::File
        );
    }

    #[test]
    fn subtype_string_roundtrip() {
        for subtype in [
            ConnectorSubtype::Postgresql,
            ConnectorSubtype::Mysql,
            ConnectorSubtype::Sqlserver,
            ConnectorSubtype::Rest,
            ConnectorSubtype::Fhir,
            ConnectorSubtype::S3,
            ConnectorSubtype::Sftp,
            ConnectorSubtype::AzureBlob,
            ConnectorSubtype::Local,
        ] {
            assert_eq!(ConnectorSubtype::parse(subtype.as_str()), Some(subtype));
        }
        assert_eq!(ConnectorSubtype::parse("oracle"), None);
    }

    #[test]
    fn job_status_terminality() {
        assert!(!SyncJobStatus::Pending.is_terminal());
        assert!(!SyncJobStatus::Running.is_terminal());
        assert!(SyncJobStatus::Success.is_terminal());
        assert!(SyncJobStatus::Failed.is_terminal());
        assert!(SyncJobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn unknown_sync_mode_falls_back_to_full() {
        assert_eq!(SyncMode::parse("incremental"), SyncMode::Incremental);
        assert_eq!(SyncMode::parse("bogus"), SyncMode::Full);
    }

    #[tokio::test]
    async fn extract_stream_delivers_in_order() {
        let (sender, mut stream) = ExtractStream::channel();
        let producer = tokio::spawn(async move {
            for i in 0..3u8 {
                let mut record = Record::new();
                record.insert("n".into(), serde_json::json!(i));
                sender.send(vec![record]).await;
            }
        });

        let mut seen = Vec::new();
        while let Some(batch) = stream.next_batch().await {
            let batch = batch.unwrap();
            seen.push(batch[0]["n"].as_u64().unwrap());
        }
        producer.await.unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn extract_stream_surfaces_terminal_error() {
        let (sender, mut stream) = ExtractStream::channel();
        tokio::spawn(async move {
            sender
                .fail(ConnectorError::Extraction("cursor lost".into()))
                .await;
        });

        let result = stream.next_batch().await.unwrap();
        assert!(matches!(result, Err(ConnectorError::Extraction(_))));
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn batch_sender_reports_dropped_reader() {
        let (sender, stream) = ExtractStream::channel();
        drop(stream);
        assert!(!sender.send(Vec::new()).await);
    }

    // Object safety
    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn connector_is_object_safe_send_sync() {
        _assert_send_sync::<Box<dyn Connector>>();
    }
}
