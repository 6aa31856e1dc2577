//! The sync worker: executes one job end to end.

use intake_connectors::ConnectorRegistry;
use intake_core::{
    redact_secrets, CancelFlag, Connector, ConnectorId, ConnectorType, JobId, MappingId,
    SyncJobStatus, SyncJobType, SyncMode, WeakCancelFlag,
};
use intake_credentials::{secret_fields, CredentialStore};
use intake_etl::{LoadStage, TransformStage};
use intake_mapper::FieldMapper;
use intake_rules::{evaluate, ReferenceData, RuleConfig, ThresholdConfig};
use intake_store::{
    AnalysisResult, AnalysisResultStore, ConnectorRepository, JobManager, MappingStore, StateDb,
    StoreError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Default bounded worker pool size.
const DEFAULT_MAX_WORKERS: usize = 5;

/// Executes sync jobs against the state store.
///
/// One worker task owns each job for its whole lifetime; concurrency is
/// bounded by a semaphore. The worker holds each running job's
/// [`CancelFlag`] and shares only weak references through the
/// cancellation registry.
pub struct SyncWorker {
    db: StateDb,
    jobs: JobManager,
    connectors: ConnectorRepository,
    mappings: MappingStore,
    results: AnalysisResultStore,
    credentials: Arc<CredentialStore>,
    registry: Arc<ConnectorRegistry>,
    datasets: Arc<ReferenceData>,
    rule_config: Arc<RuleConfig>,
    thresholds: ThresholdConfig,
    permits: Arc<Semaphore>,
    cancel_flags: Arc<Mutex<HashMap<JobId, WeakCancelFlag>>>,
    active_connectors: Arc<Mutex<HashSet<ConnectorId>>>,
}

impl SyncWorker {
    /// Build a worker over the shared state database.
    pub async fn new(
        db: StateDb,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, StoreError> {
        let pool = db.pool().clone();
        Ok(Self {
            jobs: JobManager::new(pool.clone()).await?,
            connectors: ConnectorRepository::new(pool.clone()).await?,
            mappings: MappingStore::new(pool.clone()).await?,
            results: AnalysisResultStore::new(pool).await?,
            db,
            credentials,
            registry: Arc::new(ConnectorRegistry::with_defaults()),
            datasets: Arc::new(ReferenceData::default()),
            rule_config: Arc::new(RuleConfig::default()),
            thresholds: ThresholdConfig::default(),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_WORKERS)),
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
            active_connectors: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Replace the connector registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ConnectorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Supply the reference datasets used for claims analysis.
    #[must_use]
    pub fn with_datasets(mut self, datasets: Arc<ReferenceData>) -> Self {
        self.datasets = datasets;
        self
    }

    /// Supply the rules engine configuration.
    #[must_use]
    pub fn with_rule_config(mut self, config: Arc<RuleConfig>) -> Self {
        self.rule_config = config;
        self
    }

    /// Bound the worker pool.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_workers.max(1)));
        self
    }

    /// Borrow the job manager.
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Whether a job for this connector is currently in flight.
    pub fn is_connector_running(&self, connector_id: &ConnectorId) -> bool {
        self.active_connectors
            .lock()
            .expect("active connector lock")
            .contains(connector_id)
    }

    /// Create a job record and execute it on the worker pool. Returns the
    /// job id immediately; the sync itself runs in the background.
    pub async fn execute_sync(
        self: &Arc<Self>,
        connector_id: &ConnectorId,
        job_type: SyncJobType,
        sync_mode: SyncMode,
        triggered_by: Option<&str>,
    ) -> Result<JobId, StoreError> {
        let job_id = self
            .jobs
            .create_job(connector_id, job_type, sync_mode, triggered_by)
            .await?;

        let cancel = CancelFlag::new();
        self.cancel_flags
            .lock()
            .expect("cancel registry lock")
            .insert(job_id.clone(), cancel.downgrade());
        self.active_connectors
            .lock()
            .expect("active connector lock")
            .insert(connector_id.clone());

        let worker = Arc::clone(self);
        let job = job_id.clone();
        let connector = connector_id.clone();
        tokio::spawn(async move {
            let _permit = worker
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            worker.run_sync(&job, &connector, sync_mode, &cancel).await;
            worker
                .cancel_flags
                .lock()
                .expect("cancel registry lock")
                .remove(&job);
            worker
                .active_connectors
                .lock()
                .expect("active connector lock")
                .remove(&connector);
        });

        Ok(job_id)
    }

    /// Request cancellation of a running job. The worker observes the
    /// flag between batches; counters for completed batches stand.
    pub async fn cancel_sync(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let signalled = self
            .cancel_flags
            .lock()
            .expect("cancel registry lock")
            .get(job_id)
            .map(WeakCancelFlag::cancel)
            .unwrap_or(false);
        if signalled {
            // Mark pending jobs cancelled immediately; running jobs reach
            // the terminal state when the worker observes the flag.
            let job = self.jobs.get_job(job_id).await?;
            if job.map(|j| j.status == SyncJobStatus::Pending).unwrap_or(false) {
                return self.jobs.cancel_job(job_id).await;
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn log(&self, job_id: &JobId, level: &str, message: &str, context: Option<serde_json::Value>) {
        if let Err(e) = self.jobs.add_log(job_id, level, message, context).await {
            tracing::warn!(job_id = %job_id, error = %e, "job log write failed");
        }
    }

    /// Execute one sync job to its terminal state.
    async fn run_sync(
        &self,
        job_id: &JobId,
        connector_id: &ConnectorId,
        sync_mode: SyncMode,
        cancel: &CancelFlag,
    ) {
        if let Err(e) = self.jobs.start_job(job_id).await {
            // Already cancelled before a worker picked it up.
            tracing::info!(job_id = %job_id, error = %e, "job did not start");
            return;
        }
        self.log(
            job_id,
            "info",
            &format!("Starting {sync_mode} sync for connector {connector_id}"),
            None,
        )
        .await;

        match self.drive(job_id, connector_id, sync_mode, cancel).await {
            Ok(RunOutcome::Completed { stats, watermark }) => {
                let _ = self
                    .jobs
                    .complete_job(job_id, true, None, watermark.as_deref())
                    .await;
                self.log(
                    job_id,
                    "info",
                    &format!(
                        "Sync completed: {}/{} records",
                        stats.processed, stats.total
                    ),
                    Some(serde_json::json!({
                        "total": stats.total,
                        "processed": stats.processed,
                        "failed": stats.failed,
                    })),
                )
                .await;
                let _ = self.connectors.update_sync_status(connector_id, "success").await;
            }
            Ok(RunOutcome::Cancelled) => {
                let _ = self.jobs.cancel_job(job_id).await;
                let _ = self
                    .connectors
                    .update_sync_status(connector_id, "cancelled")
                    .await;
            }
            Err(message) => {
                let sanitized = redact_secrets(&message);
                tracing::error!(job_id = %job_id, error = %sanitized, "sync job failed");
                self.log(
                    job_id,
                    "error",
                    &format!("Sync failed: {sanitized}"),
                    None,
                )
                .await;
                let _ = self
                    .jobs
                    .complete_job(job_id, false, Some(&sanitized), None)
                    .await;
                let _ = self.connectors.update_sync_status(connector_id, "failed").await;
            }
        }
    }

    /// The body of the sync: everything between `running` and a terminal
    /// transition. The connector is disconnected on every exit path.
    async fn drive(
        &self,
        job_id: &JobId,
        connector_id: &ConnectorId,
        sync_mode: SyncMode,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome, String> {
        let record = self
            .connectors
            .get(connector_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("connector {connector_id} not found"))?;

        // Inject plaintext secrets just before construction.
        let connector_type = match record.connector_type.as_str() {
            "database" => ConnectorType::Database,
            "api" => ConnectorType::Api,
            _ => ConnectorType::File,
        };
        let config = self
            .credentials
            .inject(
                connector_id,
                &record.connection_config,
                secret_fields(connector_type),
            )
            .await
            .map_err(|e| e.to_string())?;

        self.log(
            job_id,
            "info",
            &format!("Connector type: {}/{}", record.connector_type, record.subtype),
            Some(serde_json::json!({
                "config_keys": config.keys().collect::<Vec<_>>()
            })),
        )
        .await;

        let mut connector = self
            .registry
            .create(
                &record.subtype,
                connector_id.clone(),
                record.name.clone(),
                &config,
                usize::try_from(record.batch_size).unwrap_or(1000),
            )
            .map_err(|e| e.to_string())?;

        let watermark = if sync_mode == SyncMode::Incremental {
            let watermark = self
                .jobs
                .last_successful_watermark(connector_id)
                .await
                .map_err(|e| e.to_string())?;
            if let Some(watermark) = &watermark {
                self.log(job_id, "info", &format!("Using watermark: {watermark}"), None)
                    .await;
            }
            watermark
        } else {
            None
        };

        connector
            .connect()
            .await
            .map_err(|e| e.to_string())?;
        self.log(job_id, "info", "Connected to data source", None).await;

        let outcome = self
            .process_batches(
                job_id,
                connector_id,
                &record,
                &config,
                connector.as_mut(),
                sync_mode,
                watermark,
                cancel,
            )
            .await;

        // Disconnect on every exit path, cancellation included.
        connector.disconnect().await;
        outcome
    }

    #[allow(clippy::too_many_arguments, reason = "the worker loop threads run state")]
    async fn process_batches(
        &self,
        job_id: &JobId,
        connector_id: &ConnectorId,
        record: &intake_store::ConnectorRecord,
        config: &intake_core::Record,
        connector: &mut dyn Connector,
        sync_mode: SyncMode,
        watermark: Option<String>,
        cancel: &CancelFlag,
    ) -> Result<RunOutcome, String> {
        let data_type = intake_core::DataType::parse(&record.data_type)
            .ok_or_else(|| format!("unknown data type '{}'", record.data_type))?;

        let transform = TransformStage::with_mapper(Arc::new(
            self.build_mapper(config).await,
        ));
        let load = LoadStage::new(self.db.pool().clone(), data_type, None)
            .await
            .map_err(|e| e.to_string())?;
        let watermark_column = config
            .get("watermark_column")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mut stream = connector
            .extract(sync_mode, watermark.clone())
            .await
            .map_err(|e| e.to_string())?;

        let mut stats = RunStats::default();
        let mut final_watermark = watermark;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                self.log(job_id, "warning", "Sync cancelled by user", None).await;
                cancelled = true;
                break;
            }
            let batch = match stream.next_batch().await {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => return Err(e.to_string()),
                None => break,
            };

            let batch_size = batch.len();
            stats.total += batch_size;

            if let Some(column) = &watermark_column {
                if let Some(value) = batch
                    .last()
                    .and_then(|record| intake_core::record_value_string(record, column))
                {
                    final_watermark = Some(value);
                }
            }

            let transform_result = transform.transform(batch).await;
            if transform_result.failed_count > 0 {
                self.log(
                    job_id,
                    "warning",
                    &format!(
                        "Transform: {} records failed",
                        transform_result.failed_count
                    ),
                    None,
                )
                .await;
            }
            stats.failed += transform_result.failed_count;

            if !transform_result.records.is_empty() {
                let loaded = load
                    .load(transform_result.records.clone(), Some(connector_id.as_str()))
                    .await;
                if loaded.failed_count > 0 {
                    self.log(
                        job_id,
                        "warning",
                        &format!("Load: {} records failed", loaded.failed_count),
                        None,
                    )
                    .await;
                }
                stats.processed += loaded.inserted_count + loaded.updated_count;
                stats.failed += loaded.failed_count;

                if data_type == intake_core::DataType::Claims {
                    let analysis_failures = self
                        .analyze_claims(job_id, &transform_result.records)
                        .await;
                    if analysis_failures > 0 {
                        self.log(
                            job_id,
                            "warning",
                            &format!("Analysis: {analysis_failures} claims failed fraud check"),
                            None,
                        )
                        .await;
                    }
                }
            }

            let _ = self
                .jobs
                .update_progress(
                    job_id,
                    stats.total as i64,
                    stats.processed as i64,
                    stats.failed as i64,
                )
                .await;
        }

        if cancelled {
            return Ok(RunOutcome::Cancelled);
        }

        // File-style sources carry no watermark column; ask the transport.
        if final_watermark.is_none() {
            final_watermark = connector.current_watermark().await.unwrap_or(None);
        }

        Ok(RunOutcome::Completed {
            stats,
            watermark: final_watermark,
        })
    }

    /// Build the field mapper for a run, applying the connector's approved
    /// mapping version as overrides when one is referenced.
    async fn build_mapper(&self, config: &intake_core::Record) -> FieldMapper {
        let mut mapper = FieldMapper::new();
        if let Some(mapping_id) = config.get("field_mapping_id").and_then(|v| v.as_str()) {
            match self.mappings.get(&MappingId::new(mapping_id)).await {
                Ok(Some(mapping)) => {
                    let overrides: HashMap<String, String> = mapping
                        .field_mappings
                        .iter()
                        .map(|entry| (entry.source_field.clone(), entry.target_field.clone()))
                        .collect();
                    mapper = mapper.with_overrides(overrides);
                }
                Ok(None) => {
                    tracing::warn!(mapping_id, "referenced mapping not found");
                }
                Err(e) => {
                    tracing::warn!(mapping_id, error = %e, "mapping load failed");
                }
            }
        }
        mapper
    }

    /// Evaluate each claim and persist an analysis row keyed
    /// `sync-<job_id>-<claim_id>`. Returns the failure count.
    async fn analyze_claims(&self, job_id: &JobId, claims: &[intake_core::Record]) -> usize {
        let mut failures = 0;
        for claim in claims {
            let claim_id = claim
                .get("claim_id")
                .or_else(|| claim.get("visit_occurrence_id"))
                .or_else(|| claim.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();

            let claim_value = serde_json::Value::Object(claim.clone());
            let evaluation = evaluate(
                &claim_value,
                &self.datasets,
                &self.rule_config,
                &self.thresholds,
            );

            let result = AnalysisResult::for_sync(
                job_id,
                &claim_id,
                evaluation.score,
                evaluation.decision_mode.as_str(),
                serde_json::to_value(&evaluation.findings)
                    .unwrap_or(serde_json::Value::Array(Vec::new())),
                evaluation.ncci_flags,
                evaluation.coverage_flags,
                evaluation.provider_flags,
                evaluation.roi_estimate,
            );
            if let Err(e) = self.results.record(&result).await {
                tracing::warn!(claim_id, error = %e, "failed to store analysis result");
                failures += 1;
            }
        }
        failures
    }
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

#[derive(Debug, Default)]
struct RunStats {
    total: usize,
    processed: usize,
    failed: usize,
}

enum RunOutcome {
    Completed {
        stats: RunStats,
        watermark: Option<String>,
    },
    Cancelled,
}
