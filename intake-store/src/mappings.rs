//! Versioned schema-mapping persistence with an append-only audit trail.
//!
//! Mappings are never mutated in place: `approve` and `reject` change the
//! status column, new decisions create new versions, and every state change
//! appends an audit row. Exactly one *current* mapping exists per source
//! schema — the most recently approved version; pending versions never
//! override it.

use crate::StoreError;
use chrono::Utc;
use intake_core::MappingId;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Default target schema label for persisted mappings.
pub const TARGET_SCHEMA: &str = "omop_cdm_5.4";

/// How a field mapping decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    /// Direct alias-table hit.
    Alias,
    /// Embedding similarity.
    Semantic,
    /// Embedding candidates reranked by the LLM.
    LlmRerank,
    /// Human decision.
    Manual,
}

/// Lifecycle status of a mapping version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Awaiting review.
    Pending,
    /// Approved; eligible to be the current version.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
    /// Superseded and retired.
    Archived,
}

impl MappingStatus {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Approved => "approved",
            MappingStatus::Rejected => "rejected",
            MappingStatus::Archived => "archived",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MappingStatus::Pending),
            "approved" => Some(MappingStatus::Approved),
            "rejected" => Some(MappingStatus::Rejected),
            "archived" => Some(MappingStatus::Archived),
            _ => None,
        }
    }
}

/// Audit-trail action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingAction {
    /// Version created.
    Created,
    /// Version approved.
    Approved,
    /// Version rejected.
    Rejected,
    /// Version archived.
    Archived,
}

impl MappingAction {
    fn as_str(&self) -> &'static str {
        match self {
            MappingAction::Created => "created",
            MappingAction::Approved => "approved",
            MappingAction::Rejected => "rejected",
            MappingAction::Archived => "archived",
        }
    }
}

/// One source-field → canonical-field decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingEntry {
    /// Source field name.
    pub source_field: String,
    /// Canonical target field name.
    pub target_field: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// How the decision was made.
    pub method: MappingMethod,
    /// Reviewer or reranker rationale, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// A complete mapping version for one source schema.
#[derive(Debug, Clone)]
pub struct SchemaMapping {
    /// Mapping version id.
    pub id: MappingId,
    /// Which source schema this maps.
    pub source_schema_id: String,
    /// Monotonically increasing version within the source schema.
    pub version: i64,
    /// Target schema label.
    pub target_schema: String,
    /// Ordered field decisions.
    pub field_mappings: Vec<FieldMappingEntry>,
    /// Lifecycle status.
    pub status: MappingStatus,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Who created the version.
    pub created_by: Option<String>,
    /// Approval time, when approved.
    pub approved_at: Option<String>,
    /// Who approved it.
    pub approved_by: Option<String>,
}

/// One audit-trail row.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    /// Audit row id.
    pub id: String,
    /// Mapping version the action applied to.
    pub mapping_id: MappingId,
    /// What happened.
    pub action: String,
    /// Who did it.
    pub actor: String,
    /// When, RFC 3339.
    pub timestamp: String,
    /// Structured detail.
    pub details: Option<serde_json::Value>,
}

/// Storage for mapping decisions.
#[derive(Debug, Clone)]
pub struct MappingStore {
    pool: SqlitePool,
}

impl MappingStore {
    /// Open the store, creating its tables if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_mappings (
                id TEXT PRIMARY KEY,
                source_schema_id TEXT NOT NULL,
                source_schema_version INTEGER NOT NULL,
                target_schema TEXT NOT NULL DEFAULT 'omop_cdm_5.4',
                field_mappings TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                created_by TEXT,
                approved_at TEXT,
                approved_by TEXT
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS mapping_audit_log (
                id TEXT PRIMARY KEY,
                mapping_id TEXT NOT NULL,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                details TEXT
            )",
        )
        .execute(&pool)
        .await?;
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_mappings_source
             ON schema_mappings(source_schema_id, source_schema_version DESC)",
            "CREATE INDEX IF NOT EXISTS idx_mappings_status ON schema_mappings(status)",
            "CREATE INDEX IF NOT EXISTS idx_audit_mapping
             ON mapping_audit_log(mapping_id, timestamp DESC)",
        ] {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Save a new mapping version in `pending` state. The version number is
    /// one past the highest existing version for the source schema.
    pub async fn save(
        &self,
        source_schema_id: &str,
        field_mappings: Vec<FieldMappingEntry>,
        created_by: Option<&str>,
    ) -> Result<SchemaMapping, StoreError> {
        let id = MappingId::new(Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();
        let version = self.next_version(source_schema_id).await?;
        let mappings_json = serde_json::to_string(&field_mappings)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO schema_mappings
                (id, source_schema_id, source_schema_version, target_schema,
                 field_mappings, status, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(id.as_str())
        .bind(source_schema_id)
        .bind(version)
        .bind(TARGET_SCHEMA)
        .bind(&mappings_json)
        .bind(MappingStatus::Pending.as_str())
        .bind(&now)
        .bind(created_by)
        .execute(&self.pool)
        .await?;

        self.append_audit(
            &id,
            MappingAction::Created,
            created_by.unwrap_or("system"),
            Some(serde_json::json!({ "version": version })),
        )
        .await?;

        Ok(SchemaMapping {
            id,
            source_schema_id: source_schema_id.to_string(),
            version,
            target_schema: TARGET_SCHEMA.to_string(),
            field_mappings,
            status: MappingStatus::Pending,
            created_at: now,
            created_by: created_by.map(str::to_string),
            approved_at: None,
            approved_by: None,
        })
    }

    /// Approve a pending mapping. The approved version becomes current for
    /// its source schema.
    pub async fn approve(&self, id: &MappingId, actor: &str) -> Result<SchemaMapping, StoreError> {
        let result = sqlx::query(
            "UPDATE schema_mappings SET status = ?1, approved_at = ?2, approved_by = ?3
             WHERE id = ?4 AND status = ?5",
        )
        .bind(MappingStatus::Approved.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(actor)
        .bind(id.as_str())
        .bind(MappingStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                entity: format!("mapping {id}"),
                detail: "approve requires pending status".into(),
            });
        }
        self.append_audit(id, MappingAction::Approved, actor, None).await?;
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Reject a pending mapping.
    pub async fn reject(
        &self,
        id: &MappingId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE schema_mappings SET status = ?1 WHERE id = ?2 AND status = ?3",
        )
        .bind(MappingStatus::Rejected.as_str())
        .bind(id.as_str())
        .bind(MappingStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                entity: format!("mapping {id}"),
                detail: "reject requires pending status".into(),
            });
        }
        let details = reason.map(|r| serde_json::json!({ "reason": r }));
        self.append_audit(id, MappingAction::Rejected, actor, details).await?;
        Ok(())
    }

    /// Archive a mapping in any non-archived state.
    pub async fn archive(&self, id: &MappingId, actor: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE schema_mappings SET status = ?1 WHERE id = ?2 AND status != ?1",
        )
        .bind(MappingStatus::Archived.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition {
                entity: format!("mapping {id}"),
                detail: "already archived or missing".into(),
            });
        }
        self.append_audit(id, MappingAction::Archived, actor, None).await?;
        Ok(())
    }

    /// The current mapping for a source schema: the most recently approved
    /// version. Pending versions do not override it.
    pub async fn current(
        &self,
        source_schema_id: &str,
    ) -> Result<Option<SchemaMapping>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM schema_mappings
             WHERE source_schema_id = ?1 AND status = ?2
             ORDER BY source_schema_version DESC
             LIMIT 1",
        )
        .bind(source_schema_id)
        .bind(MappingStatus::Approved.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::from_row).transpose()
    }

    /// Fetch one mapping version by id.
    pub async fn get(&self, id: &MappingId) -> Result<Option<SchemaMapping>, StoreError> {
        let row = sqlx::query("SELECT * FROM schema_mappings WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::from_row).transpose()
    }

    /// All versions for a source schema, newest first.
    pub async fn history(
        &self,
        source_schema_id: &str,
    ) -> Result<Vec<SchemaMapping>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM schema_mappings
             WHERE source_schema_id = ?1
             ORDER BY source_schema_version DESC",
        )
        .bind(source_schema_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::from_row).collect()
    }

    /// The audit trail for one mapping, newest first.
    pub async fn audit_trail(&self, id: &MappingId) -> Result<Vec<AuditLogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM mapping_audit_log WHERE mapping_id = ?1 ORDER BY timestamp DESC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let details = row
                    .get::<Option<String>, _>("details")
                    .map(|d| serde_json::from_str(&d))
                    .transpose()
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(AuditLogEntry {
                    id: row.get("id"),
                    mapping_id: MappingId::new(row.get::<String, _>("mapping_id")),
                    action: row.get("action"),
                    actor: row.get("actor"),
                    timestamp: row.get("timestamp"),
                    details,
                })
            })
            .collect()
    }

    async fn next_version(&self, source_schema_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(source_schema_version) AS max_version
             FROM schema_mappings WHERE source_schema_id = ?1",
        )
        .bind(source_schema_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Option<i64>, _>("max_version").unwrap_or(0) + 1)
    }

    async fn append_audit(
        &self,
        mapping_id: &MappingId,
        action: MappingAction,
        actor: &str,
        details: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let details_json = details
            .map(|d| serde_json::to_string(&d))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO mapping_audit_log (id, mapping_id, action, actor, timestamp, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(mapping_id.as_str())
        .bind(action.as_str())
        .bind(actor)
        .bind(Utc::now().to_rfc3339())
        .bind(details_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<SchemaMapping, StoreError> {
        let status_text: String = row.get("status");
        let status = MappingStatus::parse(&status_text)
            .ok_or_else(|| StoreError::Serialization(format!("unknown status {status_text}")))?;
        let mappings_json: String = row.get("field_mappings");
        let field_mappings: Vec<FieldMappingEntry> = serde_json::from_str(&mappings_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(SchemaMapping {
            id: MappingId::new(row.get::<String, _>("id")),
            source_schema_id: row.get("source_schema_id"),
            version: row.get("source_schema_version"),
            target_schema: row.get("target_schema"),
            field_mappings,
            status,
            created_at: row.get("created_at"),
            created_by: row.get("created_by"),
            approved_at: row.get("approved_at"),
            approved_by: row.get("approved_by"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateDb;

    async fn store() -> MappingStore {
        let db = StateDb::in_memory().await.unwrap();
        MappingStore::new(db.pool().clone()).await.unwrap()
    }

    fn entry(source: &str, target: &str, method: MappingMethod) -> FieldMappingEntry {
        FieldMappingEntry {
            source_field: source.to_string(),
            target_field: target.to_string(),
            confidence: 0.97,
            method,
            reasoning: None,
        }
    }

    #[tokio::test]
    async fn versions_increase_per_source_schema() {
        let store = store().await;
        let v1 = store
            .save("payer_a", vec![entry("MemberID", "person_id", MappingMethod::Alias)], None)
            .await
            .unwrap();
        let v2 = store
            .save("payer_a", vec![entry("MemberID", "person_id", MappingMethod::Alias)], None)
            .await
            .unwrap();
        let other = store
            .save("payer_b", vec![entry("PatID", "person_id", MappingMethod::Manual)], None)
            .await
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other.version, 1);
    }

    #[tokio::test]
    async fn pending_does_not_override_current() {
        let store = store().await;
        let v1 = store
            .save("payer_a", vec![entry("MemberID", "person_id", MappingMethod::Alias)], None)
            .await
            .unwrap();
        store.approve(&v1.id, "reviewer").await.unwrap();
        // New pending version exists but current stays at v1.
        store
            .save("payer_a", vec![entry("MemberNo", "person_id", MappingMethod::Semantic)], None)
            .await
            .unwrap();

        let current = store.current("payer_a").await.unwrap().unwrap();
        assert_eq!(current.id, v1.id);
        assert_eq!(current.status, MappingStatus::Approved);
    }

    #[tokio::test]
    async fn later_approval_produces_higher_version() {
        let store = store().await;
        let v1 = store
            .save("payer_a", vec![entry("a", "person_id", MappingMethod::Alias)], None)
            .await
            .unwrap();
        store.approve(&v1.id, "reviewer").await.unwrap();
        let v2 = store
            .save("payer_a", vec![entry("b", "person_id", MappingMethod::Alias)], None)
            .await
            .unwrap();
        let approved = store.approve(&v2.id, "reviewer").await.unwrap();
        assert!(approved.version > v1.version);

        let current = store.current("payer_a").await.unwrap().unwrap();
        assert_eq!(current.id, v2.id);
    }

    #[tokio::test]
    async fn approve_requires_pending() {
        let store = store().await;
        let v1 = store
            .save("payer_a", vec![entry("a", "person_id", MappingMethod::Alias)], None)
            .await
            .unwrap();
        store.reject(&v1.id, "reviewer", Some("wrong target")).await.unwrap();
        assert!(store.approve(&v1.id, "reviewer").await.is_err());
    }

    #[tokio::test]
    async fn audit_trail_records_every_change() {
        let store = store().await;
        let v1 = store
            .save(
                "payer_a",
                vec![entry("a", "person_id", MappingMethod::LlmRerank)],
                Some("alice"),
            )
            .await
            .unwrap();
        store.approve(&v1.id, "bob").await.unwrap();
        store.archive(&v1.id, "carol").await.unwrap();

        let trail = store.audit_trail(&v1.id).await.unwrap();
        let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"created"));
        assert!(actions.contains(&"approved"));
        assert!(actions.contains(&"archived"));
        assert_eq!(trail.len(), 3);
    }

    #[tokio::test]
    async fn field_mappings_roundtrip_serialization() {
        let store = store().await;
        let mut e = entry("MemberID", "person_id", MappingMethod::LlmRerank);
        e.reasoning = Some("member identifier by value shape".into());
        let saved = store.save("payer_a", vec![e], None).await.unwrap();

        let fetched = store.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(fetched.field_mappings.len(), 1);
        assert_eq!(fetched.field_mappings[0].method, MappingMethod::LlmRerank);
        assert_eq!(
            fetched.field_mappings[0].reasoning.as_deref(),
            Some("member identifier by value shape")
        );
    }
}
