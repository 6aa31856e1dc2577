//! Workspace-level scenarios: credential upsert, pipeline cancellation
//! between batches, and a full worker-driven file sync.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use intake_core::{
    Batch, BatchSender, CancelFlag, ConnectionTestResult, Connector, ConnectorError,
    ConnectorId, DataType, ExtractStream, Record, SchemaDiscoveryResult, SyncJobStatus,
    SyncJobType, SyncMode,
};
use intake_credentials::CredentialStore;
use intake_etl::{EtlContext, ExtractStage, LoadStage, Pipeline, PipelineStatus, TransformStage};
use intake_store::{ConnectorRecord, ConnectorRepository, StateDb};
use serde_json::json;
use std::sync::Arc;

fn test_key() -> String {
    URL_SAFE.encode([5u8; 32])
}

#[tokio::test]
async fn credential_store_upserts_same_row() {
    let db = StateDb::in_memory().await.unwrap();
    let store = CredentialStore::new(db.pool().clone(), Some(&test_key()))
        .await
        .unwrap();
    let connector = ConnectorId::new("c1");

    let first_id = store.store(&connector, "password", "p1").await.unwrap();
    let second_id = store.store(&connector, "password", "p2").await.unwrap();

    assert_eq!(first_id, second_id);
    assert_eq!(
        store.get(&connector, "password").await.unwrap(),
        Some("p2".to_string())
    );
}

/// Emits batches of 100 records with a short pause between them, so
/// cancellation can land deterministically between batches.
struct PagedConnector {
    connector_id: ConnectorId,
    batches: usize,
}

#[async_trait]
impl Connector for PagedConnector {
    fn connector_id(&self) -> &ConnectorId {
        &self.connector_id
    }
    fn name(&self) -> &str {
        "paged"
    }
    async fn connect(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
    async fn disconnect(&mut self) {}
    async fn test_connection(&self) -> ConnectionTestResult {
        ConnectionTestResult::ok("ok", 1.0)
    }
    async fn discover_schema(&mut self) -> Result<SchemaDiscoveryResult, ConnectorError> {
        Ok(SchemaDiscoveryResult::default())
    }
    async fn extract(
        &mut self,
        _mode: SyncMode,
        _watermark: Option<String>,
    ) -> Result<ExtractStream, ConnectorError> {
        let (sender, stream): (BatchSender, ExtractStream) = ExtractStream::channel();
        let batches = self.batches;
        tokio::spawn(async move {
            for batch_number in 1..=batches {
                let mut batch = Batch::new();
                for i in 0..100 {
                    let mut record = Record::new();
                    record.insert(
                        "claim_id".into(),
                        json!(format!("C-{batch_number}-{i}")),
                    );
                    record.insert("modified_at".into(), json!(format!("wm-{batch_number}")));
                    batch.push(record);
                }
                if !sender.send(batch).await {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });
        Ok(stream)
    }
    async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError> {
        Ok(None)
    }
}

#[tokio::test]
async fn cancellation_lands_between_batches_with_partial_counters() {
    let db = StateDb::in_memory().await.unwrap();
    let connector = PagedConnector {
        connector_id: ConnectorId::new("c1"),
        batches: 50,
    };
    let load = LoadStage::new(db.pool().clone(), DataType::Claims, None)
        .await
        .unwrap();

    let cancel = CancelFlag::new();
    let cancel_handle = cancel.clone();
    let mut pipeline = Pipeline::new(
        ExtractStage::new(Box::new(connector), Some("modified_at".into())),
        TransformStage::passthrough(),
        load,
    )
    .on_progress(Arc::new(move |stage, processed, _total| {
        // Request cancellation once batch 3 has fully loaded.
        if stage == "load" && processed >= 300 {
            cancel_handle.cancel();
        }
    }));

    let context = EtlContext {
        connector_id: ConnectorId::new("c1"),
        sync_mode: SyncMode::Full,
        watermark_value: None,
    };
    let result = pipeline.run(&context, &cancel).await;

    assert_eq!(result.status, PipelineStatus::Cancelled);
    assert_eq!(result.loaded_count, 300);
    assert_eq!(result.extracted_count, 300);
    assert_eq!(result.final_watermark.as_deref(), Some("wm-3"));
}

#[tokio::test]
async fn worker_runs_a_file_sync_to_success() {
    use intake_scheduler::SyncWorker;

    // A local drop folder with one CSV claims file.
    let drop_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        drop_dir.path().join("claims_2024_03.csv"),
        "claim_id,MemberID,ServiceDate,ProviderNPI,billed_amount\n\
         C-1,M-001,2024-03-01,1234567893,120.50\n\
         C-2,M-002,2024-03-02,1234567893,89.00\n",
    )
    .unwrap();

    let db = StateDb::in_memory().await.unwrap();
    let credentials = Arc::new(
        CredentialStore::new(db.pool().clone(), Some(&test_key()))
            .await
            .unwrap(),
    );
    let connectors = ConnectorRepository::new(db.pool().clone()).await.unwrap();

    let mut config = Record::new();
    config.insert("path".into(), json!(drop_dir.path().to_string_lossy()));
    config.insert("file_format".into(), json!("csv"));
    config.insert("path_pattern".into(), json!("*.csv"));
    connectors
        .insert(&ConnectorRecord {
            id: ConnectorId::new("files-1"),
            name: "claims drop".into(),
            connector_type: "file".into(),
            subtype: "local".into(),
            data_type: "claims".into(),
            connection_config: config,
            sync_schedule: None,
            sync_mode: "full".into(),
            batch_size: 10,
            status: "active".into(),
            last_sync_at: None,
            last_sync_status: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            created_by: None,
        })
        .await
        .unwrap();

    let worker = Arc::new(SyncWorker::new(db.clone(), credentials).await.unwrap());
    let job_id = worker
        .execute_sync(
            &ConnectorId::new("files-1"),
            SyncJobType::Manual,
            SyncMode::Full,
            Some("test"),
        )
        .await
        .unwrap();

    // Poll until the job reaches a terminal state.
    let mut job = None;
    for _ in 0..250 {
        let current = worker.jobs().get_job(&job_id).await.unwrap().unwrap();
        if current.status.is_terminal() {
            job = Some(current);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let job = job.expect("job did not reach a terminal state");

    assert_eq!(job.status, SyncJobStatus::Success);
    assert_eq!(job.total_records, 2);
    assert_eq!(job.processed_records, 2);
    assert_eq!(job.failed_records, 0);
    // File sources watermark on the newest modification time seen.
    assert!(job.watermark_value.is_some());

    // Claims analysis rows were persisted under the synthetic sync key.
    let results = intake_store::AnalysisResultStore::new(db.pool().clone())
        .await
        .unwrap()
        .for_sync_job(&job_id)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    // The owning connector's sync status was updated.
    let connector = connectors
        .get(&ConnectorId::new("files-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connector.last_sync_status.as_deref(), Some("success"));
    assert!(connector.last_sync_at.is_some());

    // The job log stream captured the lifecycle.
    let logs = worker.jobs().logs(&job_id, 100, 0).await.unwrap();
    assert!(logs
        .iter()
        .any(|entry| entry.message.contains("Starting full sync")));
    assert!(logs.iter().any(|entry| entry.message.contains("Sync completed")));
}
