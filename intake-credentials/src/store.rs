//! The credential store implementation.

use crate::CredentialError;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::Utc;
use intake_core::{ConnectorId, Record};
use rand::RngCore;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Sentinel written into sanitized configs in place of each secret value.
/// Only this placeholder is ever persisted in a connector record.
pub const PLACEHOLDER: &str = "***ENCRYPTED***";

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Encrypted per-connector secret storage keyed by
/// `(connector_id, credential_type)`.
pub struct CredentialStore {
    pool: SqlitePool,
    cipher: Option<Aes256Gcm>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("encryption_enabled", &self.cipher.is_some())
            .finish()
    }
}

impl CredentialStore {
    /// Open the store over the shared state database, creating its table if
    /// needed. `key` is url-safe base64 of 32 bytes; `None` leaves the
    /// store readable for metadata but unable to encrypt or decrypt.
    pub async fn new(pool: SqlitePool, key: Option<&str>) -> Result<Self, CredentialError> {
        let cipher = match key {
            Some(encoded) => Some(Self::build_cipher(encoded)?),
            None => {
                tracing::warn!("no credential encryption key configured");
                None
            }
        };

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS connector_credentials (
                id TEXT PRIMARY KEY,
                connector_id TEXT NOT NULL,
                credential_type TEXT NOT NULL,
                encrypted_value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(connector_id, credential_type)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_credentials_connector
             ON connector_credentials(connector_id)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, cipher })
    }

    fn build_cipher(encoded: &str) -> Result<Aes256Gcm, CredentialError> {
        let bytes = Zeroizing::new(
            URL_SAFE
                .decode(encoded)
                .map_err(|e| CredentialError::InvalidKey(e.to_string()))?,
        );
        if bytes.len() != 32 {
            return Err(CredentialError::InvalidKey(format!(
                "expected 32 key bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)))
    }

    /// Whether encryption is configured.
    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt a plaintext value to url-safe base64 over
    /// `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let cipher = self.cipher.as_ref().ok_or(CredentialError::NotConfigured)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CredentialError::Decryption)?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(combined))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    ///
    /// The intermediate plaintext buffer is zeroed on drop, the same
    /// treatment the key material gets.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CredentialError> {
        let cipher = self.cipher.as_ref().ok_or(CredentialError::NotConfigured)?;
        let combined = URL_SAFE
            .decode(encoded)
            .map_err(|_| CredentialError::Decryption)?;
        if combined.len() <= NONCE_LEN {
            return Err(CredentialError::Decryption);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
                .map_err(|_| CredentialError::Decryption)?,
        );
        let text = std::str::from_utf8(&plaintext).map_err(|_| CredentialError::Decryption)?;
        Ok(text.to_string())
    }

    /// Store one credential, encrypting it first. Re-storing the same
    /// `(connector_id, credential_type)` updates the existing row in a
    /// single atomic statement and returns the original row id.
    pub async fn store(
        &self,
        connector_id: &ConnectorId,
        credential_type: &str,
        value: &str,
    ) -> Result<String, CredentialError> {
        let encrypted = self.encrypt(value)?;
        let now = Utc::now().to_rfc3339();
        let new_id = Uuid::new_v4().to_string();

        // The new id is only used when this turns out to be an insert.
        sqlx::query(
            "INSERT INTO connector_credentials
                (id, connector_id, credential_type, encrypted_value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(connector_id, credential_type) DO UPDATE SET
                encrypted_value = excluded.encrypted_value,
                updated_at = excluded.updated_at",
        )
        .bind(&new_id)
        .bind(connector_id.as_str())
        .bind(credential_type)
        .bind(&encrypted)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id FROM connector_credentials
             WHERE connector_id = ?1 AND credential_type = ?2",
        )
        .bind(connector_id.as_str())
        .bind(credential_type)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            connector_id = %connector_id,
            credential_type,
            "stored credential"
        );
        Ok(row.get::<String, _>("id"))
    }

    /// Retrieve and decrypt one credential, or `None` when absent.
    pub async fn get(
        &self,
        connector_id: &ConnectorId,
        credential_type: &str,
    ) -> Result<Option<String>, CredentialError> {
        let row = sqlx::query(
            "SELECT encrypted_value FROM connector_credentials
             WHERE connector_id = ?1 AND credential_type = ?2",
        )
        .bind(connector_id.as_str())
        .bind(credential_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.decrypt(&row.get::<String, _>("encrypted_value"))?)),
            None => Ok(None),
        }
    }

    /// Delete every credential for a connector. Returns the count removed.
    pub async fn delete(&self, connector_id: &ConnectorId) -> Result<u64, CredentialError> {
        let result = sqlx::query("DELETE FROM connector_credentials WHERE connector_id = ?1")
            .bind(connector_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List the credential types stored for a connector, sorted.
    pub async fn list_credential_types(
        &self,
        connector_id: &ConnectorId,
    ) -> Result<Vec<String>, CredentialError> {
        let rows = sqlx::query(
            "SELECT credential_type FROM connector_credentials
             WHERE connector_id = ?1
             ORDER BY credential_type",
        )
        .bind(connector_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("credential_type"))
            .collect())
    }

    /// Pull each listed secret out of `config`, store it encrypted, and
    /// return the sanitized config with [`PLACEHOLDER`] in each slot.
    pub async fn extract_and_store(
        &self,
        connector_id: &ConnectorId,
        config: &Record,
        secret_fields: &[&str],
    ) -> Result<Record, CredentialError> {
        let mut sanitized = config.clone();
        for field in secret_fields {
            if let Some(value) = config.get(*field).and_then(|v| v.as_str()) {
                if value.is_empty() || value == PLACEHOLDER {
                    continue;
                }
                self.store(connector_id, field, value).await?;
                sanitized.insert(
                    (*field).to_string(),
                    serde_json::Value::String(PLACEHOLDER.to_string()),
                );
            }
        }
        Ok(sanitized)
    }

    /// Inject stored plaintext secrets back into a sanitized config.
    /// Fields with no stored credential are left untouched.
    pub async fn inject(
        &self,
        connector_id: &ConnectorId,
        config: &Record,
        secret_fields: &[&str],
    ) -> Result<Record, CredentialError> {
        let mut result = config.clone();
        for field in secret_fields {
            if let Some(value) = self.get(connector_id, field).await? {
                result.insert((*field).to_string(), serde_json::Value::String(value));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn test_key() -> String {
        URL_SAFE.encode([7u8; 32])
    }

    async fn store() -> CredentialStore {
        CredentialStore::new(test_pool().await, Some(&test_key()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn encrypt_decrypt_roundtrip() {
        let store = store().await;
        for value in ["p4ssw0rd", "", "ünïcødé 🎉", "sk-ant-very-long-key"] {
            let encrypted = store.encrypt(value).unwrap();
            assert_ne!(encrypted, value);
            assert_eq!(store.decrypt(&encrypted).unwrap(), value);
        }
    }

    #[tokio::test]
    async fn decrypt_rejects_tampered_ciphertext() {
        let store = store().await;
        let mut encrypted = store.encrypt("secret").unwrap();
        encrypted.replace_range(encrypted.len() - 2.., "AA");
        assert!(matches!(
            store.decrypt(&encrypted),
            Err(CredentialError::Decryption)
        ));
    }

    #[tokio::test]
    async fn decrypt_rejects_wrong_key() {
        let pool = test_pool().await;
        let a = CredentialStore::new(pool.clone(), Some(&URL_SAFE.encode([1u8; 32])))
            .await
            .unwrap();
        let b = CredentialStore::new(pool, Some(&URL_SAFE.encode([2u8; 32])))
            .await
            .unwrap();
        let encrypted = a.encrypt("secret").unwrap();
        assert!(matches!(b.decrypt(&encrypted), Err(CredentialError::Decryption)));
    }

    #[tokio::test]
    async fn store_then_get_returns_value() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        store.store(&connector, "password", "p1").await.unwrap();
        assert_eq!(
            store.get(&connector, "password").await.unwrap(),
            Some("p1".to_string())
        );
    }

    #[tokio::test]
    async fn restore_upserts_same_row() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        let first_id = store.store(&connector, "password", "p1").await.unwrap();
        let second_id = store.store(&connector, "password", "p2").await.unwrap();
        assert_eq!(first_id, second_id);
        assert_eq!(
            store.get(&connector, "password").await.unwrap(),
            Some("p2".to_string())
        );
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = store().await;
        assert_eq!(
            store.get(&ConnectorId::new("ghost"), "password").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn delete_removes_all_for_connector() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        store.store(&connector, "password", "p1").await.unwrap();
        store.store(&connector, "api_key", "k1").await.unwrap();
        assert_eq!(store.delete(&connector).await.unwrap(), 2);
        assert_eq!(store.get(&connector, "password").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_types_is_sorted() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        store.store(&connector, "password", "p").await.unwrap();
        store.store(&connector, "api_key", "k").await.unwrap();
        assert_eq!(
            store.list_credential_types(&connector).await.unwrap(),
            vec!["api_key", "password"]
        );
    }

    #[tokio::test]
    async fn extract_and_store_sanitizes() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        let mut config = Record::new();
        config.insert("host".into(), json!("db.internal"));
        config.insert("password".into(), json!("hunter2"));

        let sanitized = store
            .extract_and_store(&connector, &config, &["password"])
            .await
            .unwrap();

        assert_eq!(sanitized["password"], json!(PLACEHOLDER));
        assert_eq!(sanitized["host"], json!("db.internal"));
        let rendered = serde_json::to_string(&sanitized).unwrap();
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn inject_restores_plaintext() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        let mut config = Record::new();
        config.insert("host".into(), json!("db.internal"));
        config.insert("password".into(), json!("hunter2"));

        let sanitized = store
            .extract_and_store(&connector, &config, &["password"])
            .await
            .unwrap();
        let restored = store
            .inject(&connector, &sanitized, &["password"])
            .await
            .unwrap();
        assert_eq!(restored["password"], json!("hunter2"));
    }

    #[tokio::test]
    async fn placeholder_is_never_re_encrypted() {
        let store = store().await;
        let connector = ConnectorId::new("c1");
        let mut config = Record::new();
        config.insert("password".into(), json!("real-secret"));
        let sanitized = store
            .extract_and_store(&connector, &config, &["password"])
            .await
            .unwrap();

        // A second pass over the sanitized config must not overwrite the
        // stored secret with the placeholder sentinel.
        store
            .extract_and_store(&connector, &sanitized, &["password"])
            .await
            .unwrap();
        assert_eq!(
            store.get(&connector, "password").await.unwrap(),
            Some("real-secret".to_string())
        );
    }

    #[tokio::test]
    async fn unconfigured_store_refuses_to_encrypt() {
        let store = CredentialStore::new(test_pool().await, None).await.unwrap();
        assert!(!store.encryption_enabled());
        assert!(matches!(
            store.encrypt("x"),
            Err(CredentialError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn bad_key_is_rejected() {
        let result = CredentialStore::new(test_pool().await, Some("not-base64!")).await;
        assert!(matches!(result, Err(CredentialError::InvalidKey(_))));

        let short = URL_SAFE.encode([0u8; 8]);
        let result = CredentialStore::new(test_pool().await, Some(&short)).await;
        assert!(matches!(result, Err(CredentialError::InvalidKey(_))));
    }
}
