//! Anthropic Messages API reranker.

use async_trait::async_trait;
use intake_mapper::{
    parse_rerank_response, MapperError, Reranker, RerankOutcome, RerankRequest,
};

/// Default model: the small tier is the right fit for structured selection
/// over pre-filtered candidates.
const DEFAULT_MODEL: &str = "claude-haiku-4-5";

/// Default Anthropic API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output budget for the structured JSON answer.
const MAX_TOKENS: u32 = 200;

/// Confidence reranker backed by the Anthropic Messages API.
///
/// Requests run at temperature 0 so identical inputs produce identical
/// mappings. Implements [`Reranker`] for the field mapper's final rung.
pub struct AnthropicReranker {
    /// API key (`ANTHROPIC_API_KEY`).
    api_key: String,
    /// Model identifier.
    model: String,
    /// API base URL (override for testing or proxies).
    base_url: String,
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl AnthropicReranker {
    /// Create a new reranker with the given API key and defaults.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the API base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Build the messages endpoint URL.
    pub(crate) fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

/// Render the rerank prompt for one request.
fn build_prompt(request: &RerankRequest) -> String {
    let candidates_text = request
        .candidates
        .iter()
        .enumerate()
        .map(|(i, (field, score))| {
            format!("{}. {field} (embedding similarity: {score:.3})", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let samples_text = if request.sample_values.is_empty() {
        "No sample values provided".to_string()
    } else {
        request
            .sample_values
            .iter()
            .map(|v| {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("\"{}\"", rendered.chars().take(50).collect::<String>())
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        r#"You are a healthcare data mapping expert. Your task is to select the best OMOP CDM field mapping.

## Source Field
Name: "{source}"
Sample values: {samples_text}

## Candidate Mappings (from embedding similarity)
{candidates_text}

## OMOP CDM Context
The target schema is OMOP CDM (Observational Medical Outcomes Partnership Common Data Model) used for healthcare analytics. Key field categories:
- person_id: Patient/member identifier
- visit_*: Encounter/visit information
- procedure_*: Procedure codes and details
- condition_*: Diagnosis codes
- provider_id, npi: Provider identifiers
- *_date, *_datetime: Temporal fields
- *_source_value: Original source values

## Instructions
1. Analyze the source field name and sample values
2. Consider healthcare domain conventions
3. Select the BEST matching candidate
4. Provide confidence score (0-100) based on:
   - Name similarity
   - Value format alignment
   - Healthcare domain knowledge
   - Semantic meaning match

Respond with ONLY valid JSON:
{{"target_field": "selected_field_name", "confidence": 85, "reasoning": "Brief explanation of why this mapping is correct"}}"#,
        source = request.source_field,
    )
}

#[async_trait]
impl Reranker for AnthropicReranker {
    /// Rerank candidates for one source field. Transport and API failures
    /// are errors; an unparseable model answer is `Ok(None)` so the caller
    /// can fall back to the top embedding candidate.
    async fn rerank(
        &self,
        request: &RerankRequest,
    ) -> Result<Option<RerankOutcome>, MapperError> {
        if request.candidates.is_empty() {
            return Ok(None);
        }

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
            "messages": [{ "role": "user", "content": build_prompt(request) }],
        });

        tracing::debug!(url = %self.messages_url(), model = %self.model,
            source_field = %request.source_field, "sending rerank request");

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MapperError::Rerank(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MapperError::Rerank(format!("body read failed: {e}")))?;

        if !status.is_success() {
            return Err(MapperError::Rerank(format!(
                "messages endpoint returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| MapperError::Rerank(format!("invalid JSON response: {e}")))?;
        let content = json["content"][0]["text"].as_str().unwrap_or("");

        match parse_rerank_response(content) {
            Some(outcome) => Ok(Some(outcome)),
            None => {
                tracing::warn!(source_field = %request.source_field,
                    "rerank response was not parseable");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RerankRequest {
        RerankRequest {
            source_field: "PatientMRN".into(),
            candidates: vec![
                ("person_id".into(), 0.85),
                ("visit_occurrence_id".into(), 0.72),
            ],
            sample_values: vec![serde_json::json!("MRN-12345")],
        }
    }

    #[test]
    fn default_configuration() {
        let reranker = AnthropicReranker::new("sk-ant-test");
        assert_eq!(reranker.model, DEFAULT_MODEL);
        assert_eq!(reranker.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            reranker.messages_url(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn builder_overrides() {
        let reranker = AnthropicReranker::new("k")
            .model("claude-sonnet-4-5")
            .base_url("http://localhost:9999");
        assert_eq!(reranker.model, "claude-sonnet-4-5");
        assert_eq!(reranker.messages_url(), "http://localhost:9999/v1/messages");
    }

    #[test]
    fn prompt_contains_field_candidates_and_samples() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("\"PatientMRN\""));
        assert!(prompt.contains("1. person_id (embedding similarity: 0.850)"));
        assert!(prompt.contains("2. visit_occurrence_id"));
        assert!(prompt.contains("\"MRN-12345\""));
        assert!(prompt.contains("ONLY valid JSON"));
    }

    #[test]
    fn prompt_truncates_long_sample_values() {
        let mut req = request();
        req.sample_values = vec![serde_json::json!("x".repeat(400))];
        let prompt = build_prompt(&req);
        assert!(!prompt.contains(&"x".repeat(60)));
    }

    #[test]
    fn prompt_handles_no_samples() {
        let mut req = request();
        req.sample_values.clear();
        assert!(build_prompt(&req).contains("No sample values provided"));
    }
}
