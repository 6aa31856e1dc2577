//! Load stage: per-data-type target tables with upserts and an audit
//! companion.

use chrono::Utc;
use intake_core::{Batch, DataType, Record, StageError};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Outcome of loading one batch.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Rows inserted.
    pub inserted_count: usize,
    /// Rows updated.
    pub updated_count: usize,
    /// Rows that failed to persist.
    pub failed_count: usize,
    /// One entry per failure: `{record_index, record_id, error}`.
    pub errors: Vec<serde_json::Value>,
}

/// Load stage targeting one per-data-type table.
///
/// Invariants: the primary key is `id` (generated when absent);
/// `created_at` is set on insert, `updated_at` on insert and update;
/// fields outside the table schema are serialized into the spillover
/// column; every insert and update appends an `<table>_audit` row.
pub struct LoadStage {
    pool: SqlitePool,
    data_type: DataType,
    table: String,
    upsert: bool,
    changed_by: Option<String>,
}

const CLAIMS_COLUMNS: &[&str] = &[
    "id",
    "claim_id",
    "patient_id",
    "provider_npi",
    "date_of_service",
    "procedure_codes",
    "diagnosis_codes",
    "billed_amount",
    "allowed_amount",
    "paid_amount",
    "place_of_service",
    "claim_type",
    "status",
    "raw_data",
    "source_connector_id",
    "created_at",
    "updated_at",
];

const ELIGIBILITY_COLUMNS: &[&str] = &[
    "id",
    "member_id",
    "patient_id",
    "plan_id",
    "plan_name",
    "coverage_start",
    "coverage_end",
    "status",
    "coverage_type",
    "raw_data",
    "source_connector_id",
    "created_at",
    "updated_at",
];

const PROVIDERS_COLUMNS: &[&str] = &[
    "id",
    "npi",
    "name",
    "specialty",
    "taxonomy_code",
    "address",
    "city",
    "state",
    "zip_code",
    "phone",
    "status",
    "credentialing_date",
    "raw_data",
    "source_connector_id",
    "created_at",
    "updated_at",
];

const REFERENCE_COLUMNS: &[&str] = &[
    "id",
    "code",
    "code_type",
    "description",
    "effective_date",
    "termination_date",
    "metadata",
    "raw_data",
    "source_connector_id",
    "created_at",
    "updated_at",
];

impl LoadStage {
    /// Open the stage, creating the target and audit tables if needed.
    /// The table defaults to `synced_<data_type>`.
    pub async fn new(
        pool: SqlitePool,
        data_type: DataType,
        table: Option<String>,
    ) -> Result<Self, StageError> {
        let table = table.unwrap_or_else(|| format!("synced_{data_type}"));
        let stage = Self {
            pool,
            data_type,
            table,
            upsert: true,
            changed_by: None,
        };
        stage.ensure_tables().await?;
        Ok(stage)
    }

    /// Disable updates: existing rows are skipped instead.
    #[must_use]
    pub fn without_upsert(mut self) -> Self {
        self.upsert = false;
        self
    }

    /// Attribute audit rows to an actor.
    #[must_use]
    pub fn changed_by(mut self, actor: impl Into<String>) -> Self {
        self.changed_by = Some(actor.into());
        self
    }

    fn columns(&self) -> &'static [&'static str] {
        match self.data_type {
            DataType::Claims => CLAIMS_COLUMNS,
            DataType::Eligibility => ELIGIBILITY_COLUMNS,
            DataType::Providers => PROVIDERS_COLUMNS,
            DataType::Reference => REFERENCE_COLUMNS,
        }
    }

    async fn ensure_tables(&self) -> Result<(), StageError> {
        let body = self
            .columns()
            .iter()
            .map(|column| match *column {
                "id" => format!("{column} TEXT PRIMARY KEY"),
                "created_at" | "updated_at" => format!("{column} TEXT NOT NULL"),
                "billed_amount" | "allowed_amount" | "paid_amount" => {
                    format!("{column} REAL")
                }
                _ => format!("{column} TEXT"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({body})",
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StageError::Load(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {}_audit (
                id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                old_data TEXT,
                new_data TEXT,
                changed_at TEXT NOT NULL,
                changed_by TEXT
            )",
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| StageError::Load(e.to_string()))?;
        Ok(())
    }

    /// Load one batch. Per-record failures are counted, never thrown.
    pub async fn load(
        &self,
        records: Batch,
        source_connector_id: Option<&str>,
    ) -> LoadResult {
        let mut result = LoadResult::default();
        let now = Utc::now().to_rfc3339();

        for (index, mut record) in records.into_iter().enumerate() {
            let id = match record.get("id").and_then(|v| v.as_str()) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    let id = Uuid::new_v4().to_string();
                    record.insert("id".into(), Value::String(id.clone()));
                    id
                }
            };
            if let Some(source) = source_connector_id {
                record.insert(
                    "source_connector_id".into(),
                    Value::String(source.to_string()),
                );
            }

            match self.load_one(&id, record, &now).await {
                Ok(true) => result.inserted_count += 1,
                Ok(false) => result.updated_count += 1,
                Err(LoadOutcome::Skipped) => {}
                Err(LoadOutcome::Failed(e)) => {
                    result.failed_count += 1;
                    result.errors.push(serde_json::json!({
                        "record_index": index,
                        "record_id": id,
                        "error": e,
                    }));
                    tracing::debug!(index, error = %e, "load error");
                }
            }
        }
        result
    }

    async fn load_one(
        &self,
        id: &str,
        record: Record,
        now: &str,
    ) -> Result<bool, LoadOutcome> {
        let existing = self.fetch_existing(id).await.map_err(LoadOutcome::failed)?;

        let (mut known, spill) = self.split_columns(record);
        known.insert("updated_at".into(), Value::String(now.to_string()));
        if !spill.is_empty() {
            let column = self.spill_column();
            let rendered = serde_json::to_string(&spill).map_err(LoadOutcome::failed)?;
            known.insert(column.to_string(), Value::String(rendered));
        }

        match existing {
            Some(old_row) => {
                if !self.upsert {
                    return Err(LoadOutcome::Skipped);
                }
                self.update_row(id, &known).await.map_err(LoadOutcome::failed)?;
                self.append_audit(id, "update", Some(old_row), &known, now)
                    .await
                    .map_err(LoadOutcome::failed)?;
                Ok(false)
            }
            None => {
                known.insert("created_at".into(), Value::String(now.to_string()));
                self.insert_row(&known).await.map_err(LoadOutcome::failed)?;
                self.append_audit(id, "insert", None, &known, now)
                    .await
                    .map_err(LoadOutcome::failed)?;
                Ok(true)
            }
        }
    }

    fn spill_column(&self) -> &'static str {
        "raw_data"
    }

    /// Split a record into table-schema fields and spillover fields.
    fn split_columns(&self, record: Record) -> (Record, Record) {
        let columns = self.columns();
        let mut known = Record::new();
        let mut spill = Record::new();
        for (key, value) in record {
            if columns.contains(&key.as_str()) {
                known.insert(key, render_cell(value));
            } else {
                spill.insert(key, value);
            }
        }
        (known, spill)
    }

    async fn fetch_existing(&self, id: &str) -> Result<Option<Value>, String> {
        let row = sqlx::query(&format!("SELECT * FROM {} WHERE id = ?1", self.table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(row.map(|row| {
            let mut map = serde_json::Map::new();
            for column in self.columns() {
                if let Ok(value) = row.try_get::<Option<String>, _>(*column) {
                    map.insert(
                        (*column).to_string(),
                        value.map_or(Value::Null, Value::String),
                    );
                }
            }
            Value::Object(map)
        }))
    }

    async fn insert_row(&self, fields: &Record) -> Result<(), String> {
        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for value in fields.values() {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn update_row(&self, id: &str, fields: &Record) -> Result<(), String> {
        let assignments: Vec<String> = fields
            .keys()
            .filter(|k| k.as_str() != "id")
            .enumerate()
            .map(|(i, column)| format!("{column} = ?{}", i + 1))
            .collect();
        if assignments.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table,
            assignments.join(", "),
            assignments.len() + 1
        );
        let mut query = sqlx::query(&sql);
        for (key, value) in fields {
            if key != "id" {
                query = bind_value(query, value);
            }
        }
        query
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn append_audit(
        &self,
        record_id: &str,
        operation: &str,
        old_data: Option<Value>,
        new_data: &Record,
        now: &str,
    ) -> Result<(), String> {
        sqlx::query(&format!(
            "INSERT INTO {}_audit (id, record_id, operation, old_data, new_data, changed_at, changed_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            self.table
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(record_id)
        .bind(operation)
        .bind(
            old_data
                .map(|d| serde_json::to_string(&d))
                .transpose()
                .map_err(|e| e.to_string())?,
        )
        .bind(serde_json::to_string(new_data).map_err(|e| e.to_string())?)
        .bind(now)
        .bind(self.changed_by.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Total rows currently in the target table.
    pub async fn record_count(&self) -> Result<i64, StageError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StageError::Load(e.to_string()))?;
        Ok(row.get::<i64, _>("n"))
    }
}

enum LoadOutcome {
    Skipped,
    Failed(String),
}

impl LoadOutcome {
    fn failed(e: impl std::fmt::Display) -> Self {
        LoadOutcome::Failed(e.to_string())
    }
}

/// Render complex values into their stored text form.
fn render_cell(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => {
            Value::String(serde_json::to_string(&value).unwrap_or_default())
        }
        other => other,
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                query.bind(int)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_store::StateDb;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn stage() -> (StateDb, LoadStage) {
        let db = StateDb::in_memory().await.unwrap();
        let stage = LoadStage::new(db.pool().clone(), DataType::Claims, None)
            .await
            .unwrap();
        (db, stage)
    }

    #[tokio::test]
    async fn insert_sets_timestamps_and_spills_unknown_fields() {
        let (db, stage) = stage().await;
        let batch = vec![record(json!({
            "id": "r-1",
            "claim_id": "C-1",
            "billed_amount": 120.5,
            "person_id": "M-1"
        }))];
        let result = stage.load(batch, Some("conn-1")).await;
        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.failed_count, 0);

        let row = sqlx::query("SELECT * FROM synced_claims WHERE id = 'r-1'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("claim_id"), "C-1");
        assert_eq!(row.get::<String, _>("source_connector_id"), "conn-1");
        assert!(!row.get::<String, _>("created_at").is_empty());
        let raw: String = row.get("raw_data");
        assert!(raw.contains("person_id"));
    }

    #[tokio::test]
    async fn idempotent_upsert_keeps_row_count_stable() {
        let (db, stage) = stage().await;
        let batch = vec![
            record(json!({"id": "r-1", "claim_id": "C-1"})),
            record(json!({"id": "r-2", "claim_id": "C-2"})),
        ];

        let first = stage.load(batch.clone(), None).await;
        assert_eq!(first.inserted_count + first.updated_count, 2);
        assert_eq!(first.inserted_count, 2);

        let second = stage.load(batch, None).await;
        assert_eq!(second.inserted_count + second.updated_count, 2);
        assert_eq!(second.updated_count, 2);

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM synced_claims")
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn missing_id_is_generated() {
        let (_db, stage) = stage().await;
        let result = stage
            .load(vec![record(json!({"claim_id": "C-9"}))], None)
            .await;
        assert_eq!(result.inserted_count, 1);
        assert_eq!(stage.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn without_upsert_skips_existing_rows() {
        let (_db, stage) = stage().await;
        let no_upsert = stage.without_upsert();
        let batch = vec![record(json!({"id": "r-1", "claim_id": "C-1"}))];
        no_upsert.load(batch.clone(), None).await;
        let second = no_upsert.load(batch, None).await;
        assert_eq!(second.inserted_count, 0);
        assert_eq!(second.updated_count, 0);
        assert_eq!(second.failed_count, 0);
    }

    #[tokio::test]
    async fn audit_rows_record_insert_and_update() {
        let (db, stage) = stage().await;
        let batch = vec![record(json!({"id": "r-1", "claim_id": "C-1", "status": "new"}))];
        stage.load(batch, None).await;
        let update = vec![record(json!({"id": "r-1", "claim_id": "C-1", "status": "paid"}))];
        stage.load(update, None).await;

        let rows = sqlx::query(
            "SELECT operation, old_data FROM synced_claims_audit
             WHERE record_id = 'r-1' ORDER BY changed_at, operation",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
        let operations: Vec<String> = rows.iter().map(|r| r.get("operation")).collect();
        assert!(operations.contains(&"insert".to_string()));
        assert!(operations.contains(&"update".to_string()));
        let update_row = rows
            .iter()
            .find(|r| r.get::<String, _>("operation") == "update")
            .unwrap();
        let old: String = update_row.get::<Option<String>, _>("old_data").unwrap();
        assert!(old.contains("new"));
    }
}
