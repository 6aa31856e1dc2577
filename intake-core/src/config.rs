//! Process-level configuration read once at startup.
//!
//! Rotation of any value requires a restart; nothing re-reads the
//! environment after [`RuntimeConfig::from_env`].

use std::env;

/// Default state-store path when `DB_PATH` is unset.
pub const DEFAULT_DB_PATH: &str = "data/intake.db";

/// Environment-derived runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `DB_PATH`: SQLite state store location.
    pub db_path: String,
    /// `CREDENTIAL_ENCRYPTION_KEY`: url-safe base64 AES-256-GCM key.
    /// Absent means the credential store refuses to encrypt.
    pub credential_encryption_key: Option<String>,
    /// `CHROMA_PERSIST_DIR`: vector store location for policy documents.
    pub chroma_persist_dir: Option<String>,
    /// `EMBEDDING_MODEL`: embedding model selector for the field mapper.
    pub embedding_model: Option<String>,
    /// `ANTHROPIC_API_KEY`: credential for the mapping reranker.
    pub anthropic_api_key: Option<String>,
}

impl RuntimeConfig {
    /// Read all configuration variables. Call exactly once, at startup.
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            credential_encryption_key: env::var("CREDENTIAL_ENCRYPTION_KEY").ok(),
            chroma_persist_dir: env::var("CHROMA_PERSIST_DIR").ok(),
            embedding_model: env::var("EMBEDDING_MODEL").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_db_path_applies() {
        // Environment mutation is process-global; only assert the default
        // constant wiring here.
        assert_eq!(DEFAULT_DB_PATH, "data/intake.db");
        let config = RuntimeConfig {
            db_path: DEFAULT_DB_PATH.into(),
            credential_encryption_key: None,
            chroma_persist_dir: None,
            embedding_model: None,
            anthropic_api_key: None,
        };
        assert_eq!(config.db_path, "data/intake.db");
    }
}
