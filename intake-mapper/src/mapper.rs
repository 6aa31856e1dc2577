//! The field mapper: resolution ladder, flattening, and grouped output.

use crate::rerank::{disposition, Disposition, Reranker, RerankRequest, MAX_SAMPLE_VALUES};
use crate::semantic::SemanticMatcher;
use intake_core::Record;
use intake_schema::{is_canonical, resolve_alias};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// How a field was resolved to its canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    /// Per-invocation override table.
    Override,
    /// Direct alias-table hit.
    Alias,
    /// Alias hit after camelCase → snake_case transformation.
    CaseTransform,
    /// Embedding similarity.
    Semantic,
    /// Embedding candidates reranked by the LLM.
    LlmRerank,
}

/// One resolved source field.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    /// Canonical field name.
    pub canonical: String,
    /// Which ladder rung matched.
    pub method: ResolutionMethod,
    /// Confidence in `[0, 1]` (1.0 for deterministic rungs).
    pub confidence: f64,
}

/// Side-channel detail from one transformation.
#[derive(Debug, Clone, Default)]
pub struct MappingReport {
    /// Source fields no rung could resolve.
    pub unmapped: Vec<String>,
    /// Fields resolved semantically: `(source, canonical, confidence)`.
    pub semantic_matches: Vec<(String, String, f64)>,
    /// Source fields mapped below the auto-accept confidence band.
    pub needs_review: Vec<String>,
}

/// Transforms source records into the canonical claim shape.
///
/// Deterministic rungs (overrides, aliases, case transforms) always run;
/// the embedding and rerank rungs only run when backends are attached.
pub struct FieldMapper {
    overrides: HashMap<String, String>,
    semantic: Option<Arc<SemanticMatcher>>,
    reranker: Option<Arc<dyn Reranker>>,
    semantic_threshold: f64,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapper {
    /// A mapper with only the deterministic rungs enabled.
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            semantic: None,
            reranker: None,
            semantic_threshold: SemanticMatcher::DEFAULT_THRESHOLD,
        }
    }

    /// Attach per-invocation overrides (`source field → canonical name`).
    /// Lookup is case-insensitive and wins over every other rung.
    #[must_use]
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self
    }

    /// Enable the embedding rung.
    #[must_use]
    pub fn with_semantic(mut self, matcher: Arc<SemanticMatcher>) -> Self {
        self.semantic = Some(matcher);
        self
    }

    /// Override the embedding similarity threshold.
    #[must_use]
    pub fn with_semantic_threshold(mut self, threshold: f64) -> Self {
        self.semantic_threshold = threshold;
        self
    }

    /// Enable the LLM rerank rung on top of the embedding rung.
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Resolve one source field through the ladder, first match wins.
    pub async fn resolve(&self, field: &str) -> Option<ResolvedField> {
        self.resolve_with_samples(field, &[]).await
    }

    async fn resolve_with_samples(&self, field: &str, samples: &[Value]) -> Option<ResolvedField> {
        let lower = field.to_lowercase();

        // 1. Custom overrides win outright.
        if let Some(canonical) = self.overrides.get(&lower) {
            return Some(ResolvedField {
                canonical: canonical.clone(),
                method: ResolutionMethod::Override,
                confidence: 1.0,
            });
        }

        // 2. Direct alias lookup.
        if let Some(canonical) = resolve_alias(field) {
            return Some(ResolvedField {
                canonical: canonical.to_string(),
                method: ResolutionMethod::Alias,
                confidence: 1.0,
            });
        }

        // 3. Case transformation, then alias lookup again.
        let snake = to_snake_case(field);
        if snake != lower {
            if let Some(canonical) = resolve_alias(&snake) {
                return Some(ResolvedField {
                    canonical: canonical.to_string(),
                    method: ResolutionMethod::CaseTransform,
                    confidence: 1.0,
                });
            }
        }

        // 4 & 5. Embedding similarity, optionally reranked.
        let matcher = self.semantic.as_ref()?;
        let candidates = matcher
            .find_candidates(field, SemanticMatcher::DEFAULT_TOP_K, self.semantic_threshold)
            .await
            .map_err(|e| tracing::warn!(field, error = %e, "semantic match failed"))
            .ok()?;
        if candidates.is_empty() {
            return None;
        }

        if let Some(reranker) = &self.reranker {
            let request = RerankRequest {
                source_field: field.to_string(),
                candidates: candidates.clone(),
                sample_values: samples.iter().take(MAX_SAMPLE_VALUES).cloned().collect(),
            };
            match reranker.rerank(&request).await {
                Ok(Some(outcome)) => {
                    if disposition(outcome.confidence) == Disposition::Manual {
                        return None;
                    }
                    return Some(ResolvedField {
                        canonical: outcome.target_field,
                        method: ResolutionMethod::LlmRerank,
                        confidence: f64::from(outcome.confidence) / 100.0,
                    });
                }
                Ok(None) => {
                    tracing::warn!(field, "reranker returned no parseable outcome");
                }
                Err(e) => {
                    tracing::warn!(field, error = %e, "reranker failed");
                }
            }
        }

        let (canonical, score) = candidates.into_iter().next()?;
        Some(ResolvedField {
            canonical,
            method: ResolutionMethod::Semantic,
            confidence: score,
        })
    }

    /// Transform a raw record into the canonical claim shape.
    pub async fn transform(&self, raw: &Record) -> Record {
        self.transform_with_report(raw).await.0
    }

    /// Transform and also return the mapping report for review routing.
    pub async fn transform_with_report(&self, raw: &Record) -> (Record, MappingReport) {
        let mut report = MappingReport::default();
        let mut mapped = Record::new();

        for (source_field, value) in flatten(raw) {
            let samples = std::slice::from_ref(&value);
            match self.resolve_with_samples(&source_field, samples).await {
                Some(resolved) => {
                    match resolved.method {
                        ResolutionMethod::Semantic => {
                            report.semantic_matches.push((
                                source_field.clone(),
                                resolved.canonical.clone(),
                                resolved.confidence,
                            ));
                        }
                        ResolutionMethod::LlmRerank => {
                            report.semantic_matches.push((
                                source_field.clone(),
                                resolved.canonical.clone(),
                                resolved.confidence,
                            ));
                            if resolved.confidence * 100.0
                                < f64::from(crate::rerank::HIGH_CONFIDENCE_THRESHOLD)
                            {
                                report.needs_review.push(source_field.clone());
                            }
                        }
                        _ => {}
                    }
                    mapped.insert(resolved.canonical, value);
                }
                None => {
                    if !report.unmapped.contains(&source_field) {
                        report.unmapped.push(source_field);
                    }
                }
            }
        }

        if !report.unmapped.is_empty() {
            tracing::debug!(
                unmapped = report.unmapped.len(),
                first = ?report.unmapped.first(),
                "record has unmapped fields"
            );
        }

        let normalized = self.assemble(mapped, raw).await;
        (normalized, report)
    }

    /// Merge mapped fields with the grouped member/provider/items
    /// sub-structures.
    async fn assemble(&self, mapped: Record, raw: &Record) -> Record {
        let mut normalized = mapped;

        let member = extract_member(&normalized, raw);
        let provider = extract_provider(&normalized, raw);
        let items = self.extract_items(raw).await;

        normalized.insert("member".into(), Value::Object(member));
        normalized.insert("provider".into(), Value::Object(provider));
        normalized.insert("items".into(), Value::Array(items));

        if !normalized.contains_key("visit_occurrence_id") {
            if let Some(id) = raw
                .get("claim_id")
                .or_else(|| raw.get("id"))
                .filter(|v| !v.is_null())
            {
                normalized.insert("visit_occurrence_id".into(), id.clone());
            }
        }

        normalized
    }

    /// Normalize line items individually through the same resolution
    /// rules, first mapping per item winning.
    async fn extract_items(&self, raw: &Record) -> Vec<Value> {
        let Some(Value::Array(raw_items)) = raw.get("items") else {
            return Vec::new();
        };

        let mut normalized_items = Vec::new();
        for item in raw_items {
            let Value::Object(item) = item else { continue };
            let mut normalized_item = Record::new();

            for (key, value) in item {
                if is_canonical(key) {
                    normalized_item.entry(key.clone()).or_insert(value.clone());
                    continue;
                }
                if let Some(resolved) = self.resolve(key).await {
                    normalized_item
                        .entry(resolved.canonical)
                        .or_insert(value.clone());
                }
            }

            if !normalized_item.is_empty() {
                normalized_items.push(Value::Object(normalized_item));
            }
        }
        normalized_items
    }
}

impl std::fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMapper")
            .field("overrides", &self.overrides.len())
            .field("semantic", &self.semantic.is_some())
            .field("reranker", &self.reranker.is_some())
            .finish()
    }
}

/// Convert camelCase or PascalCase to snake_case.
fn to_snake_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            result.push('_');
        }
        result.extend(ch.to_lowercase());
    }
    result
}

/// Flatten nested maps with dot notation, additionally surfacing each leaf
/// key unqualified so alias matching works on either form. Lists of
/// objects (line items) are kept whole.
fn flatten(data: &Record) -> Vec<(String, Value)> {
    let mut items = Vec::new();
    flatten_into(data, "", &mut items);
    items
}

fn flatten_into(data: &Record, parent: &str, out: &mut Vec<(String, Value)>) {
    for (key, value) in data {
        let qualified = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}.{key}")
        };
        match value {
            Value::Object(nested) => {
                flatten_into(nested, &qualified, out);
                // Surface leaves unqualified for alias matching.
                for (nested_key, nested_value) in nested {
                    if !matches!(nested_value, Value::Object(_) | Value::Array(_)) {
                        out.push((nested_key.clone(), nested_value.clone()));
                    }
                }
            }
            Value::Array(array)
                if array.first().map(Value::is_object).unwrap_or(false) =>
            {
                out.push((qualified, value.clone()));
            }
            _ => {
                out.push((qualified, value.clone()));
                if !parent.is_empty() {
                    out.push((key.clone(), value.clone()));
                }
            }
        }
    }
}

fn extract_member(mapped: &Record, raw: &Record) -> Record {
    let mut member = Record::new();
    for field in ["person_id", "birth_datetime", "gender_source_value", "age"] {
        if let Some(value) = mapped.get(field) {
            member.insert(field.to_string(), value.clone());
        }
    }
    if let Some(Value::Object(raw_member)) = raw.get("member") {
        if !member.contains_key("person_id") {
            if let Some(id) = raw_member.get("member_id") {
                member.insert("person_id".into(), id.clone());
            }
        }
        if let Some(age) = raw_member.get("age") {
            member.insert("age".into(), age.clone());
        }
        if let Some(gender) = raw_member.get("gender") {
            member.insert("gender_source_value".into(), gender.clone());
        }
    }
    member
}

fn extract_provider(mapped: &Record, raw: &Record) -> Record {
    let mut provider = Record::new();
    for field in ["npi", "specialty_source_value", "provider_id"] {
        if let Some(value) = mapped.get(field) {
            provider.insert(field.to_string(), value.clone());
        }
    }
    if let Some(Value::Object(raw_provider)) = raw.get("provider") {
        if !provider.contains_key("npi") {
            if let Some(npi) = raw_provider.get("npi") {
                provider.insert("npi".into(), npi.clone());
            }
        }
        if let Some(specialty) = raw_provider.get("specialty") {
            provider.insert("specialty_source_value".into(), specialty.clone());
        }
    }
    provider
}
