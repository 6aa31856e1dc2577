//! The pipeline loop: extract → transform → load, batch by batch.

use crate::extract::ExtractStage;
use crate::load::LoadStage;
use crate::transform::TransformStage;
use intake_core::{CancelFlag, ConnectorId, SyncMode};
use std::sync::Arc;

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// All batches succeeded with zero record failures.
    Success,
    /// The run completed but some records failed a stage.
    Partial,
    /// Extraction itself failed; the run was aborted.
    Failed,
    /// Cancellation was observed between batches.
    Cancelled,
}

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct EtlContext {
    /// Connector being synced.
    pub connector_id: ConnectorId,
    /// Full or incremental.
    pub sync_mode: SyncMode,
    /// Watermark seeding an incremental run.
    pub watermark_value: Option<String>,
}

/// Summary of one run.
#[derive(Debug)]
pub struct EtlResult {
    /// Terminal state.
    pub status: PipelineStatus,
    /// Records read from the source.
    pub extracted_count: usize,
    /// Records that passed the transform stage.
    pub transformed_count: usize,
    /// Records inserted or updated by the load stage.
    pub loaded_count: usize,
    /// Records that failed transform or load.
    pub failed_count: usize,
    /// Watermark of the most recent non-empty batch.
    pub final_watermark: Option<String>,
    /// Sanitized failure description for failed runs.
    pub error_message: Option<String>,
}

/// Progress callback: `(stage_name, processed, total)`.
pub type ProgressCallback = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Error callback: `(stage_name, message)`.
pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Composable ETL pipeline over one connector.
pub struct Pipeline {
    extract: ExtractStage,
    transform: TransformStage,
    load: LoadStage,
    on_progress: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
}

impl Pipeline {
    /// Compose the three stages.
    pub fn new(extract: ExtractStage, transform: TransformStage, load: LoadStage) -> Self {
        Self {
            extract,
            transform,
            load,
            on_progress: None,
            on_error: None,
        }
    }

    /// Observe progress per stage.
    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Observe stage errors.
    #[must_use]
    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    fn progress(&self, stage: &str, processed: usize, total: usize) {
        if let Some(callback) = &self.on_progress {
            callback(stage, processed, total);
        }
    }

    fn error(&self, stage: &str, message: &str) {
        if let Some(callback) = &self.on_error {
            callback(stage, message);
        }
    }

    /// Run to completion, cancellation, or extraction failure. The
    /// connector is disconnected on every exit path.
    pub async fn run(&mut self, context: &EtlContext, cancel: &CancelFlag) -> EtlResult {
        tracing::info!(connector_id = %context.connector_id, mode = %context.sync_mode,
            "starting pipeline");

        let mut extracted = 0usize;
        let mut transformed = 0usize;
        let mut loaded = 0usize;
        let mut failed = 0usize;
        let mut final_watermark = context.watermark_value.clone();
        let mut status = PipelineStatus::Success;
        let mut error_message = None;

        let feed = self
            .extract
            .begin(context.sync_mode, context.watermark_value.clone())
            .await;
        match feed {
            Ok(mut feed) => loop {
                // Cancellation is observed between batches only.
                if cancel.is_cancelled() {
                    tracing::info!("pipeline cancelled");
                    status = PipelineStatus::Cancelled;
                    break;
                }
                let extraction = match feed.next().await {
                    Some(Ok(extraction)) => extraction,
                    Some(Err(e)) => {
                        let message = e.to_string();
                        self.error("extract", &message);
                        status = PipelineStatus::Failed;
                        error_message = Some(message);
                        break;
                    }
                    None => break,
                };

                extracted += extraction.in_batch;
                self.progress("extract", extracted, 0);

                let transform_result = self.transform.transform(extraction.records).await;
                transformed += transform_result.transformed_count;
                failed += transform_result.failed_count;
                for error in &transform_result.errors {
                    self.error("transform", &error.to_string());
                }
                self.progress("transform", transformed, extracted);

                if !transform_result.records.is_empty() {
                    let load_result = self
                        .load
                        .load(transform_result.records, Some(context.connector_id.as_str()))
                        .await;
                    loaded += load_result.inserted_count + load_result.updated_count;
                    failed += load_result.failed_count;
                    for error in &load_result.errors {
                        self.error("load", &error.to_string());
                    }
                    self.progress("load", loaded, transformed);
                }

                if let Some(watermark) = extraction.watermark_value {
                    final_watermark = Some(watermark);
                }
            },
            Err(e) => {
                let message = e.to_string();
                self.error("extract", &message);
                status = PipelineStatus::Failed;
                error_message = Some(message);
            }
        }

        self.extract.connector_mut().disconnect().await;

        if status == PipelineStatus::Success && failed > 0 {
            status = PipelineStatus::Partial;
        }
        tracing::info!(
            ?status, extracted, transformed, loaded, failed,
            "pipeline finished"
        );

        EtlResult {
            status,
            extracted_count: extracted,
            transformed_count: transformed,
            loaded_count: loaded,
            failed_count: failed,
            final_watermark,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::{
        Batch, BatchSender, ConnectionTestResult, Connector, ConnectorError, DataType,
        ExtractStream, Record, SchemaDiscoveryResult,
    };
    use intake_store::StateDb;
    use serde_json::json;

    struct ScriptedConnector {
        connector_id: ConnectorId,
        batches: Vec<Batch>,
        fail_at: Option<usize>,
        disconnected: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        fn connector_id(&self) -> &ConnectorId {
            &self.connector_id
        }
        fn name(&self) -> &str {
            "scripted"
        }
        async fn connect(&mut self) -> Result<(), ConnectorError> {
            Ok(())
        }
        async fn disconnect(&mut self) {
            self.disconnected
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
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
            let batches = self.batches.clone();
            let fail_at = self.fail_at;
            tokio::spawn(async move {
                for (i, batch) in batches.into_iter().enumerate() {
                    if Some(i) == fail_at {
                        sender
                            .fail(ConnectorError::Extraction("cursor lost".into()))
                            .await;
                        return;
                    }
                    if !sender.send(batch).await {
                        return;
                    }
                }
            });
            Ok(stream)
        }
        async fn current_watermark(&mut self) -> Result<Option<String>, ConnectorError> {
            Ok(None)
        }
    }

    fn claim(id: u64, modified: &str) -> Record {
        let mut record = Record::new();
        record.insert("claim_id".into(), json!(format!("C-{id}")));
        record.insert("modified_at".into(), json!(modified));
        record
    }

    async fn build_pipeline(
        batches: Vec<Batch>,
        fail_at: Option<usize>,
    ) -> (Pipeline, Arc<std::sync::atomic::AtomicBool>) {
        let disconnected = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let connector = ScriptedConnector {
            connector_id: ConnectorId::new("c1"),
            batches,
            fail_at,
            disconnected: disconnected.clone(),
        };
        let db = StateDb::in_memory().await.unwrap();
        let load = LoadStage::new(db.pool().clone(), DataType::Claims, None)
            .await
            .unwrap();
        let pipeline = Pipeline::new(
            ExtractStage::new(Box::new(connector), Some("modified_at".into())),
            TransformStage::passthrough(),
            load,
        );
        (pipeline, disconnected)
    }

    fn context() -> EtlContext {
        EtlContext {
            connector_id: ConnectorId::new("c1"),
            sync_mode: SyncMode::Full,
            watermark_value: None,
        }
    }

    #[tokio::test]
    async fn successful_run_accounts_and_disconnects() {
        let (mut pipeline, disconnected) = build_pipeline(
            vec![
                vec![claim(1, "2024-01-01"), claim(2, "2024-01-02")],
                vec![claim(3, "2024-01-03")],
            ],
            None,
        )
        .await;

        let result = pipeline.run(&context(), &CancelFlag::new()).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.extracted_count, 3);
        assert_eq!(result.transformed_count, 3);
        assert_eq!(result.loaded_count, 3);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.final_watermark.as_deref(), Some("2024-01-03"));
        assert!(disconnected.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn extraction_failure_fails_the_run() {
        let (mut pipeline, disconnected) =
            build_pipeline(vec![vec![claim(1, "2024-01-01")], vec![claim(2, "x")]], Some(1))
                .await;

        let result = pipeline.run(&context(), &CancelFlag::new()).await;
        assert_eq!(result.status, PipelineStatus::Failed);
        // The first batch still counted before the failure.
        assert_eq!(result.extracted_count, 1);
        assert!(result.error_message.unwrap().contains("cursor lost"));
        assert!(disconnected.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pre_set_cancellation_cancels_before_first_batch() {
        let (mut pipeline, disconnected) =
            build_pipeline(vec![vec![claim(1, "2024-01-01")]], None).await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = pipeline.run(&context(), &cancel).await;
        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert_eq!(result.extracted_count, 0);
        assert!(disconnected.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn progress_callbacks_fire_per_stage() {
        let (pipeline, _) =
            build_pipeline(vec![vec![claim(1, "2024-01-01")]], None).await;
        let seen: Arc<std::sync::Mutex<Vec<String>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut pipeline = pipeline.on_progress(Arc::new(move |stage, _, _| {
            seen_clone.lock().unwrap().push(stage.to_string());
        }));

        pipeline.run(&context(), &CancelFlag::new()).await;
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["extract", "transform", "load"]);
    }
}
