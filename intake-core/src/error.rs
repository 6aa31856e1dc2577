//! Error types for each protocol.

use thiserror::Error;

/// Connector execution errors.
///
/// Kinds are distinguishable by variant, not by message text — retry policy
/// and job accounting branch on the variant.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing or invalid configuration: unknown subtype, absent required
    /// key, invalid identifier, invalid cron expression. Never retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport-level failure (DNS, TCP, TLS, handshake, auth).
    /// Retryable within the transport's bounded retry budget.
    #[error("connection error: {0}")]
    Connection(String),

    /// Upstream signalled a rate limit. Carries the advertised retry delay
    /// in seconds when the upstream provided one.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Human-readable description from the upstream.
        message: String,
        /// `Retry-After` value in seconds, if the upstream sent one.
        retry_after: Option<u64>,
    },

    /// Mid-extraction failure after a successful connect. Terminates the
    /// run; partial batches already delivered stand.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Schema discovery failed; surfaced to the caller unchanged.
    #[error("schema discovery failed: {0}")]
    SchemaDiscovery(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ConnectorError {
    /// Whether a bounded retry within the same run may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Connection(_) | ConnectorError::RateLimit { .. }
        )
    }
}

/// Per-record pipeline stage errors.
///
/// These are counted and logged; they never terminate a run on their own.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StageError {
    /// Field mapping or value normalization failed for one record.
    #[error("transformation failed: {0}")]
    Transformation(String),

    /// Persisting one record failed.
    #[error("load failed: {0}")]
    Load(String),

    /// A validator rejected the record.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ConnectorError::Connection("reset".into()).is_retryable());
        assert!(
            ConnectorError::RateLimit {
                message: "slow down".into(),
                retry_after: Some(2),
            }
            .is_retryable()
        );
        assert!(!ConnectorError::Configuration("bad".into()).is_retryable());
        assert!(!ConnectorError::Extraction("mid-run".into()).is_retryable());
    }

    #[test]
    fn display_includes_kind() {
        assert_eq!(
            ConnectorError::Configuration("missing host".into()).to_string(),
            "configuration error: missing host"
        );
        assert_eq!(
            StageError::Load("disk full".into()).to_string(),
            "load failed: disk full"
        );
    }
}
