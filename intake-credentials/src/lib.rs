//! Encrypted credential storage for connector secrets.
//!
//! Secrets never live in the connector configuration record: the store owns
//! the ciphertext, the record holds a fixed placeholder, and the worker
//! injects plaintext back just before a connector is constructed.
//!
//! ## Design
//!
//! - AES-256-GCM (AEAD) with a single process-level key from
//!   `CREDENTIAL_ENCRYPTION_KEY`; the encoded form is url-safe base64 over
//!   `nonce || ciphertext`.
//! - `(connector_id, credential_type)` is unique; writes are a single
//!   `INSERT … ON CONFLICT DO UPDATE`, so concurrent stores cannot race.
//! - Decryption failure is a distinct error kind ([`CredentialError::
//!   Decryption`]) — never a silent empty value.

#![deny(missing_docs)]

pub mod catalog;
mod store;

pub use catalog::secret_fields;
pub use store::{CredentialStore, PLACEHOLDER};

use thiserror::Error;

/// Errors from credential storage and cryptography (crate-local).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No encryption key is configured; encrypt/decrypt are unavailable.
    #[error("credential encryption not configured: set CREDENTIAL_ENCRYPTION_KEY")]
    NotConfigured,

    /// The configured key is not url-safe base64 of 32 bytes.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// Ciphertext could not be authenticated or decoded with the configured
    /// key.
    #[error("invalid encrypted value or wrong key")]
    Decryption,

    /// The backing database rejected an operation.
    #[error("credential storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
