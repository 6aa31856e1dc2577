//! LLM confidence reranking of embedding candidates.

use crate::MapperError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Confidence at or above which a mapping is auto-accepted.
pub const HIGH_CONFIDENCE_THRESHOLD: u8 = 85;

/// Confidence below which a mapping is rejected or queued for manual
/// resolution.
pub const LOW_CONFIDENCE_THRESHOLD: u8 = 50;

/// At most this many sample values are sent to the reranker.
pub const MAX_SAMPLE_VALUES: usize = 5;

/// Routing decision derived from a rerank confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// `confidence >= 85`: accept without review.
    AutoAccept,
    /// `50 <= confidence < 85`: flag for human review.
    NeedsReview,
    /// `confidence < 50`: reject or queue for manual resolution.
    Manual,
}

/// Band a confidence score into its routing disposition.
pub fn disposition(confidence: u8) -> Disposition {
    if confidence >= HIGH_CONFIDENCE_THRESHOLD {
        Disposition::AutoAccept
    } else if confidence >= LOW_CONFIDENCE_THRESHOLD {
        Disposition::NeedsReview
    } else {
        Disposition::Manual
    }
}

/// Input to one rerank call.
#[derive(Debug, Clone, Serialize)]
pub struct RerankRequest {
    /// Source field being mapped.
    pub source_field: String,
    /// Embedding candidates as `(canonical_name, similarity)`, best first.
    pub candidates: Vec<(String, f64)>,
    /// Up to [`MAX_SAMPLE_VALUES`] sample values from the source field.
    pub sample_values: Vec<serde_json::Value>,
}

/// Structured output of a successful rerank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankOutcome {
    /// The selected canonical field.
    pub target_field: String,
    /// Confidence in `[0, 100]`.
    pub confidence: u8,
    /// One-sentence rationale.
    pub reasoning: String,
}

/// Confidence reranker over embedding candidates.
///
/// The backend must run deterministically (temperature 0) and produce
/// structured output. A parse failure is reported as `Ok(None)` — the
/// caller then falls back to the highest-similarity candidate.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank the candidates for one source field.
    async fn rerank(&self, request: &RerankRequest) -> Result<Option<RerankOutcome>, MapperError>;
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid fence regex"));

static BARE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("valid object regex"));

#[derive(Deserialize)]
struct RawOutcome {
    target_field: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn decode(text: &str) -> Option<RerankOutcome> {
    let raw: RawOutcome = serde_json::from_str(text).ok()?;
    Some(RerankOutcome {
        target_field: raw.target_field,
        confidence: raw.confidence.clamp(0.0, 100.0).round() as u8,
        reasoning: raw.reasoning,
    })
}

/// Parse a model response into a [`RerankOutcome`], tolerating markdown
/// code fences and surrounding prose. Returns `None` when no valid JSON
/// object can be recovered.
pub fn parse_rerank_response(text: &str) -> Option<RerankOutcome> {
    if text.is_empty() {
        return None;
    }
    if let Some(caps) = CODE_FENCE.captures(text) {
        if let Some(outcome) = decode(caps[1].trim()) {
            return Some(outcome);
        }
    }
    if let Some(outcome) = decode(text.trim()) {
        return Some(outcome);
    }
    if let Some(m) = BARE_OBJECT.find(text) {
        if let Some(outcome) = decode(m.as_str()) {
            return Some(outcome);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_contiguous_and_exact() {
        assert_eq!(disposition(100), Disposition::AutoAccept);
        assert_eq!(disposition(85), Disposition::AutoAccept);
        assert_eq!(disposition(84), Disposition::NeedsReview);
        assert_eq!(disposition(50), Disposition::NeedsReview);
        assert_eq!(disposition(49), Disposition::Manual);
        assert_eq!(disposition(0), Disposition::Manual);
    }

    #[test]
    fn parses_raw_json() {
        let outcome = parse_rerank_response(
            r#"{"target_field": "person_id", "confidence": 92, "reasoning": "member id shape"}"#,
        )
        .unwrap();
        assert_eq!(outcome.target_field, "person_id");
        assert_eq!(outcome.confidence, 92);
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Here is my answer:\n```json\n{\"target_field\": \"npi\", \"confidence\": 88, \"reasoning\": \"ten digit provider id\"}\n```";
        let outcome = parse_rerank_response(text).unwrap();
        assert_eq!(outcome.target_field, "npi");
        assert_eq!(outcome.confidence, 88);
    }

    #[test]
    fn parses_embedded_object() {
        let text = "The best match is {\"target_field\": \"quantity\", \"confidence\": 60, \"reasoning\": \"unit counts\"} based on samples.";
        let outcome = parse_rerank_response(text).unwrap();
        assert_eq!(outcome.target_field, "quantity");
        assert_eq!(disposition(outcome.confidence), Disposition::NeedsReview);
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        let outcome = parse_rerank_response(
            r#"{"target_field": "npi", "confidence": 140, "reasoning": ""}"#,
        )
        .unwrap();
        assert_eq!(outcome.confidence, 100);
    }

    #[test]
    fn parse_failure_is_none() {
        assert!(parse_rerank_response("").is_none());
        assert!(parse_rerank_response("I am not sure about this one.").is_none());
        assert!(parse_rerank_response("{\"confidence\": 90}").is_none());
    }
}
