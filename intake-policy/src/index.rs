//! The versioned policy index seam and its SQLite implementation.

use crate::model::PolicyDocument;
use crate::PolicyError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// First version of this policy key.
    Added,
    /// A newer version superseded the previous current entry.
    Updated,
}

/// Versioned document index.
///
/// The production deployment points this at the vector store the RAG
/// search endpoint reads (`CHROMA_PERSIST_DIR`); the SQLite
/// implementation below carries the same versioning contract for
/// deployments and tests without one.
#[async_trait]
pub trait PolicyIndex: Send + Sync {
    /// Insert or re-version a document by its policy key.
    async fn upsert(&self, document: &PolicyDocument) -> Result<IndexOutcome, PolicyError>;

    /// The current version's metadata for a policy key, when indexed.
    async fn current_version(&self, policy_key: &str) -> Result<Option<i64>, PolicyError>;
}

/// SQLite-backed policy index.
#[derive(Debug, Clone)]
pub struct SqlitePolicyIndex {
    pool: SqlitePool,
}

impl SqlitePolicyIndex {
    /// Open the index, creating its table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, PolicyError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS policy_documents (
                id TEXT PRIMARY KEY,
                policy_key TEXT NOT NULL,
                source TEXT NOT NULL,
                source_value TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                effective_date TEXT,
                expires_date TEXT,
                keywords TEXT,
                related_codes TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                is_current INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_policy_documents_key
             ON policy_documents(policy_key, is_current)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl PolicyIndex for SqlitePolicyIndex {
    async fn upsert(&self, document: &PolicyDocument) -> Result<IndexOutcome, PolicyError> {
        let key = document.policy_key();
        let previous = sqlx::query(
            "SELECT version FROM policy_documents
             WHERE policy_key = ?1 AND is_current = 1
             ORDER BY version DESC LIMIT 1",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        let next_version = match &previous {
            Some(row) => row.get::<i64, _>("version") + 1,
            None => 1,
        };
        if previous.is_some() {
            sqlx::query(
                "UPDATE policy_documents SET is_current = 0 WHERE policy_key = ?1",
            )
            .bind(&key)
            .execute(&self.pool)
            .await?;
        }

        let encode = |list: &Vec<String>| {
            serde_json::to_string(list).map_err(|e| PolicyError::Index(e.to_string()))
        };
        sqlx::query(
            "INSERT INTO policy_documents
                (id, policy_key, source, source_value, title, content,
                 effective_date, expires_date, keywords, related_codes,
                 version, is_current, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&key)
        .bind(document.source.as_str())
        .bind(&document.source_value)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.effective_date)
        .bind(&document.expires_date)
        .bind(encode(&document.keywords)?)
        .bind(encode(&document.related_codes)?)
        .bind(next_version)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(if next_version == 1 {
            IndexOutcome::Added
        } else {
            IndexOutcome::Updated
        })
    }

    async fn current_version(&self, policy_key: &str) -> Result<Option<i64>, PolicyError> {
        let row = sqlx::query(
            "SELECT version FROM policy_documents
             WHERE policy_key = ?1 AND is_current = 1",
        )
        .bind(policy_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("version")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PolicySource;
    use intake_store::StateDb;

    fn document(title: &str) -> PolicyDocument {
        PolicyDocument {
            source: PolicySource::MlnMatters,
            source_value: "MM13456".into(),
            title: title.into(),
            content: "Providers must…".into(),
            effective_date: Some("2024-04-01".into()),
            expires_date: None,
            keywords: vec!["billing".into()],
            related_codes: vec!["99213".into()],
        }
    }

    #[tokio::test]
    async fn first_upsert_adds_then_reversions() {
        let db = StateDb::in_memory().await.unwrap();
        let index = SqlitePolicyIndex::new(db.pool().clone()).await.unwrap();
        let doc = document("Billing update");

        assert_eq!(index.upsert(&doc).await.unwrap(), IndexOutcome::Added);
        assert_eq!(index.current_version(&doc.policy_key()).await.unwrap(), Some(1));

        assert_eq!(index.upsert(&doc).await.unwrap(), IndexOutcome::Updated);
        assert_eq!(index.current_version(&doc.policy_key()).await.unwrap(), Some(2));

        // Exactly one current row survives.
        let current: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM policy_documents
             WHERE policy_key = ?1 AND is_current = 1",
        )
        .bind(doc.policy_key())
        .fetch_one(db.pool())
        .await
        .unwrap()
        .get("n");
        assert_eq!(current, 1);
    }

    #[tokio::test]
    async fn different_titles_are_distinct_keys() {
        let db = StateDb::in_memory().await.unwrap();
        let index = SqlitePolicyIndex::new(db.pool().clone()).await.unwrap();
        index.upsert(&document("A")).await.unwrap();
        assert_eq!(
            index.upsert(&document("B")).await.unwrap(),
            IndexOutcome::Added
        );
    }
}
