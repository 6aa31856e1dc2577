//! Per-source sync orchestration, state, throttling, and auditing.

use crate::index::{IndexOutcome, PolicyIndex};
use crate::model::{PolicyDocument, PolicySource, SyncResult};
use crate::PolicyError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One audit event emitted by the syncer.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// What happened (`sync_started`, `sync_completed`, `sync_failed`).
    pub action: String,
    /// The source involved.
    pub source: PolicySource,
    /// Structured detail.
    pub details: serde_json::Value,
}

/// Shared audit log sink (external collaborator).
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one event.
    async fn record(&self, event: AuditEvent);
}

/// Orchestrates policy document ingestion per source.
pub struct PolicySyncer {
    pool: SqlitePool,
    index: Arc<dyn PolicyIndex>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl PolicySyncer {
    /// Build a syncer over the state database and a document index.
    pub async fn new(
        pool: SqlitePool,
        index: Arc<dyn PolicyIndex>,
    ) -> Result<Self, PolicyError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS policy_sync_runs (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                found INTEGER NOT NULL DEFAULT 0,
                added INTEGER NOT NULL DEFAULT 0,
                updated INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_policy_sync_runs_source
             ON policy_sync_runs(source, started_at DESC)",
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            pool,
            index,
            audit: None,
        })
    }

    /// Attach the shared audit log sink.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    async fn emit(&self, action: &str, source: PolicySource, details: serde_json::Value) {
        if let Some(sink) = &self.audit {
            sink.record(AuditEvent {
                action: action.to_string(),
                source,
                details,
            })
            .await;
        }
    }

    /// When the source last started a completed sync.
    pub async fn last_sync_at(
        &self,
        source: PolicySource,
    ) -> Result<Option<DateTime<Utc>>, PolicyError> {
        let row = sqlx::query(
            "SELECT started_at FROM policy_sync_runs
             WHERE source = ?1 AND status = 'completed'
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|r| r.get::<String, _>("started_at"))
            .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Whether the source is due: `now − last_sync_at ≥ min_interval_hours`.
    pub async fn should_sync(
        &self,
        source: PolicySource,
        min_interval_hours: i64,
    ) -> Result<bool, PolicyError> {
        match self.last_sync_at(source).await? {
            Some(last) => Ok(Utc::now() - last >= Duration::hours(min_interval_hours)),
            None => Ok(true),
        }
    }

    /// Run one per-source sync over the given documents. When the source
    /// is throttled and `force` is false, the run is recorded as skipped.
    pub async fn sync_source(
        &self,
        source: PolicySource,
        documents: &[PolicyDocument],
        min_interval_hours: i64,
        force: bool,
    ) -> Result<SyncResult, PolicyError> {
        let clock = Instant::now();

        if !force && !self.should_sync(source, min_interval_hours).await? {
            tracing::info!(source = %source, "sync throttled");
            return Ok(SyncResult {
                found: documents.len(),
                skipped: documents.len(),
                duration_ms: clock.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        let run_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO policy_sync_runs (id, source, status, started_at, found)
             VALUES (?1, ?2, 'running', ?3, ?4)",
        )
        .bind(&run_id)
        .bind(source.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(documents.len() as i64)
        .execute(&self.pool)
        .await?;
        self.emit(
            "sync_started",
            source,
            serde_json::json!({"found": documents.len()}),
        )
        .await;

        let mut result = SyncResult {
            found: documents.len(),
            ..Default::default()
        };
        for document in documents {
            if document.source != source {
                result.skipped += 1;
                continue;
            }
            match self.index.upsert(document).await {
                Ok(IndexOutcome::Added) => result.added += 1,
                Ok(IndexOutcome::Updated) => result.updated += 1,
                Err(e) => {
                    tracing::warn!(key = %document.policy_key(), error = %e,
                        "document index failed");
                    result.errors.push(format!("{}: {e}", document.policy_key()));
                }
            }
        }
        result.duration_ms = clock.elapsed().as_millis() as u64;

        let failed = !result.errors.is_empty() && result.added + result.updated == 0;
        let status = if failed { "failed" } else { "completed" };
        sqlx::query(
            "UPDATE policy_sync_runs
             SET status = ?1, completed_at = ?2, added = ?3, updated = ?4,
                 skipped = ?5, error_message = ?6
             WHERE id = ?7",
        )
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .bind(result.added as i64)
        .bind(result.updated as i64)
        .bind(result.skipped as i64)
        .bind(result.errors.first().cloned())
        .bind(&run_id)
        .execute(&self.pool)
        .await?;

        self.emit(
            if failed { "sync_failed" } else { "sync_completed" },
            source,
            serde_json::json!({
                "added": result.added,
                "updated": result.updated,
                "skipped": result.skipped,
                "errors": result.errors.len(),
            }),
        )
        .await;

        Ok(result)
    }

    /// Run every source in order, skipping throttled ones unless forced.
    pub async fn sync_all(
        &self,
        batches: &[(PolicySource, Vec<PolicyDocument>)],
        min_interval_hours: i64,
        force: bool,
    ) -> Result<Vec<(PolicySource, SyncResult)>, PolicyError> {
        let mut results = Vec::new();
        for (source, documents) in batches {
            let result = self
                .sync_source(*source, documents, min_interval_hours, force)
                .await?;
            results.push((*source, result));
        }
        Ok(results)
    }
}

impl std::fmt::Debug for PolicySyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PolicySyncer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SqlitePolicyIndex;
    use intake_store::StateDb;
    use std::sync::Mutex;

    fn document(title: &str) -> PolicyDocument {
        PolicyDocument {
            source: PolicySource::NcciEdits,
            source_value: "2024Q2".into(),
            title: title.into(),
            content: "Edit table…".into(),
            effective_date: None,
            expires_date: None,
            keywords: vec![],
            related_codes: vec![],
        }
    }

    async fn syncer() -> PolicySyncer {
        let db = StateDb::in_memory().await.unwrap();
        let index = Arc::new(SqlitePolicyIndex::new(db.pool().clone()).await.unwrap());
        PolicySyncer::new(db.pool().clone(), index).await.unwrap()
    }

    #[tokio::test]
    async fn first_run_adds_second_updates() {
        let syncer = syncer().await;
        let docs = vec![document("Quarterly release")];

        let first = syncer
            .sync_source(PolicySource::NcciEdits, &docs, 0, false)
            .await
            .unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.updated, 0);

        let second = syncer
            .sync_source(PolicySource::NcciEdits, &docs, 0, true)
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 1);
    }

    #[tokio::test]
    async fn throttle_skips_until_interval_or_force() {
        let syncer = syncer().await;
        let docs = vec![document("Quarterly release")];
        syncer
            .sync_source(PolicySource::NcciEdits, &docs, 6, false)
            .await
            .unwrap();

        let throttled = syncer
            .sync_source(PolicySource::NcciEdits, &docs, 6, false)
            .await
            .unwrap();
        assert_eq!(throttled.skipped, 1);
        assert_eq!(throttled.added + throttled.updated, 0);

        let forced = syncer
            .sync_source(PolicySource::NcciEdits, &docs, 6, true)
            .await
            .unwrap();
        assert_eq!(forced.updated, 1);
    }

    #[tokio::test]
    async fn mismatched_source_documents_are_skipped() {
        let syncer = syncer().await;
        let mut doc = document("LCD change");
        doc.source = PolicySource::LcdUpdates;
        let result = syncer
            .sync_source(PolicySource::NcciEdits, &[doc], 0, false)
            .await
            .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.added, 0);
    }

    struct RecordingSink(Mutex<Vec<String>>);

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event.action);
        }
    }

    #[tokio::test]
    async fn audit_events_cover_start_and_completion() {
        let db = StateDb::in_memory().await.unwrap();
        let index = Arc::new(SqlitePolicyIndex::new(db.pool().clone()).await.unwrap());
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let syncer = PolicySyncer::new(db.pool().clone(), index)
            .await
            .unwrap()
            .with_audit(sink.clone());

        syncer
            .sync_source(PolicySource::NcciEdits, &[document("x")], 0, false)
            .await
            .unwrap();
        let actions = sink.0.lock().unwrap().clone();
        assert_eq!(actions, vec!["sync_started", "sync_completed"]);
    }
}
