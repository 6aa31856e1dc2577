//! HTTP-backed semantic mapping providers.
//!
//! Two clients implementing the `intake-mapper` backend traits:
//! [`HttpEmbeddings`] speaks the OpenAI-compatible embeddings wire format
//! (which most self-hosted embedding servers also expose), and
//! [`AnthropicReranker`] scores candidate mappings through the Anthropic
//! Messages API at temperature 0.

#![deny(missing_docs)]

pub mod embeddings;
pub mod reranker;

pub use embeddings::HttpEmbeddings;
pub use reranker::AnthropicReranker;
