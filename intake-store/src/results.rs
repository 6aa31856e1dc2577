//! Fraud-analysis result persistence for sync-produced evaluations.

use crate::StoreError;
use chrono::Utc;
use intake_core::JobId;
use sqlx::{Row, SqlitePool};

/// Synthetic result key for a claim analyzed during a sync run.
pub fn sync_result_key(job_id: &JobId, claim_id: &str) -> String {
    format!("sync-{job_id}-{claim_id}")
}

/// One persisted rules-engine evaluation.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Result key (`sync-<job_id>-<claim_id>` for sync-produced rows).
    pub job_id: String,
    /// Claim the evaluation applies to.
    pub claim_id: String,
    /// Aggregated score in `[0, 1]`.
    pub fraud_score: f64,
    /// Decision mode derived from the score.
    pub decision_mode: String,
    /// Serialized findings.
    pub rule_hits: serde_json::Value,
    /// NCCI category flags.
    pub ncci_flags: Vec<String>,
    /// Coverage category flags.
    pub coverage_flags: Vec<String>,
    /// Provider category flags.
    pub provider_flags: Vec<String>,
    /// Accumulated ROI estimate, when any rule produced one.
    pub roi_estimate: Option<f64>,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

/// Repository over the `results` table.
#[derive(Debug, Clone)]
pub struct AnalysisResultStore {
    pool: SqlitePool,
}

impl AnalysisResultStore {
    /// Open the store, creating its table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS results (
                job_id TEXT PRIMARY KEY,
                claim_id TEXT,
                fraud_score REAL,
                decision_mode TEXT,
                rule_hits TEXT,
                ncci_flags TEXT,
                coverage_flags TEXT,
                provider_flags TEXT,
                roi_estimate REAL,
                created_at TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Insert or replace one analysis result.
    pub async fn record(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        let encode = |v: &Vec<String>| -> Result<String, StoreError> {
            serde_json::to_string(v).map_err(|e| StoreError::Serialization(e.to_string()))
        };
        sqlx::query(
            "INSERT OR REPLACE INTO results
                (job_id, claim_id, fraud_score, decision_mode, rule_hits,
                 ncci_flags, coverage_flags, provider_flags, roi_estimate, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&result.job_id)
        .bind(&result.claim_id)
        .bind(result.fraud_score)
        .bind(&result.decision_mode)
        .bind(
            serde_json::to_string(&result.rule_hits)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        )
        .bind(encode(&result.ncci_flags)?)
        .bind(encode(&result.coverage_flags)?)
        .bind(encode(&result.provider_flags)?)
        .bind(result.roi_estimate)
        .bind(&result.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one result by key.
    pub async fn get(&self, job_id: &str) -> Result<Option<AnalysisResult>, StoreError> {
        let row = sqlx::query("SELECT * FROM results WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::from_row).transpose()
    }

    /// All results produced by one sync job.
    pub async fn for_sync_job(&self, job_id: &JobId) -> Result<Vec<AnalysisResult>, StoreError> {
        let prefix = format!("sync-{job_id}-%");
        let rows = sqlx::query("SELECT * FROM results WHERE job_id LIKE ?1 ORDER BY created_at")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<AnalysisResult, StoreError> {
        let decode_list = |text: Option<String>| -> Result<Vec<String>, StoreError> {
            match text {
                Some(t) => {
                    serde_json::from_str(&t).map_err(|e| StoreError::Serialization(e.to_string()))
                }
                None => Ok(Vec::new()),
            }
        };
        let rule_hits = match row.get::<Option<String>, _>("rule_hits") {
            Some(t) => {
                serde_json::from_str(&t).map_err(|e| StoreError::Serialization(e.to_string()))?
            }
            None => serde_json::Value::Array(Vec::new()),
        };
        Ok(AnalysisResult {
            job_id: row.get("job_id"),
            claim_id: row.get::<Option<String>, _>("claim_id").unwrap_or_default(),
            fraud_score: row.get::<Option<f64>, _>("fraud_score").unwrap_or(0.0),
            decision_mode: row
                .get::<Option<String>, _>("decision_mode")
                .unwrap_or_default(),
            rule_hits,
            ncci_flags: decode_list(row.get("ncci_flags"))?,
            coverage_flags: decode_list(row.get("coverage_flags"))?,
            provider_flags: decode_list(row.get("provider_flags"))?,
            roi_estimate: row.get("roi_estimate"),
            created_at: row.get::<Option<String>, _>("created_at").unwrap_or_default(),
        })
    }
}

impl AnalysisResult {
    /// Build a result row for a claim analyzed during a sync run.
    pub fn for_sync(
        job_id: &JobId,
        claim_id: &str,
        fraud_score: f64,
        decision_mode: &str,
        rule_hits: serde_json::Value,
        ncci_flags: Vec<String>,
        coverage_flags: Vec<String>,
        provider_flags: Vec<String>,
        roi_estimate: Option<f64>,
    ) -> Self {
        Self {
            job_id: sync_result_key(job_id, claim_id),
            claim_id: claim_id.to_string(),
            fraud_score,
            decision_mode: decision_mode.to_string(),
            rule_hits,
            ncci_flags,
            coverage_flags,
            provider_flags,
            roi_estimate,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
