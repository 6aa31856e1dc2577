//! Field mapping from arbitrary source schemas to the canonical schema.
//!
//! Resolution runs a fixed ladder, first match wins:
//!
//! 1. Custom per-invocation overrides (case-insensitive).
//! 2. Canonical alias lookup.
//! 3. Case transformation (camelCase → snake_case), then alias lookup again.
//! 4. Embedding similarity against canonical field descriptions (optional).
//! 5. LLM rerank of the top-K embedding candidates (optional).
//!
//! The embedding and rerank backends are traits ([`EmbeddingProvider`],
//! [`Reranker`]) so the mapper stays testable without a model; HTTP-backed
//! implementations live in `intake-llm`.

#![deny(missing_docs)]

pub mod mapper;
pub mod rerank;
pub mod semantic;

pub use mapper::{FieldMapper, MappingReport, ResolutionMethod, ResolvedField};
pub use rerank::{
    disposition, parse_rerank_response, Disposition, Reranker, RerankOutcome, RerankRequest,
    HIGH_CONFIDENCE_THRESHOLD, LOW_CONFIDENCE_THRESHOLD,
};
pub use semantic::{normalize_field_name, EmbeddingProvider, SemanticMatcher};

use thiserror::Error;

/// Errors from semantic mapping backends (crate-local).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MapperError {
    /// The embedding backend failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The rerank backend failed.
    #[error("rerank error: {0}")]
    Rerank(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
