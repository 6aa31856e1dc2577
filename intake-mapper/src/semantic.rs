//! Embedding-based semantic matching against the canonical schema.

use crate::MapperError;
use async_trait::async_trait;
use intake_schema::CLAIMS_SCHEMA;
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;

/// Dense-vector embedding backend.
///
/// Implementations: `HttpEmbeddings` (intake-llm) against any
/// OpenAI-compatible embeddings endpoint; test doubles in this crate.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed each input text into one dense vector. The output length and
    /// order must match the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MapperError>;
}

static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").expect("valid camel boundary regex"));

/// Non-semantic column-name prefixes stripped before encoding.
const STRIP_PREFIXES: &[&str] = &["fld", "col", "txt", "num", "dt", "cd"];

/// Normalize a field name into human-readable words for encoding:
/// camelCase and snake_case are split, and common non-semantic prefixes
/// (`fld_`, `col_`, `txt_`, `num_`, `dt_`, `cd_`) are removed.
pub fn normalize_field_name(name: &str) -> String {
    let spaced = CAMEL_BOUNDARY.replace_all(name, "$1 $2").replace('_', " ");
    let lowered = spaced.to_lowercase();
    for prefix in STRIP_PREFIXES {
        if let Some(rest) = lowered.strip_prefix(&format!("{prefix} ")) {
            return rest.trim().to_string();
        }
    }
    spaced.trim().to_string()
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Semantic field matcher over the canonical schema.
///
/// Each canonical field is encoded once at build time as
/// `name | description | first-3-aliases`; source fields are normalized,
/// encoded on demand, and cached in an LRU.
pub struct SemanticMatcher {
    provider: Arc<dyn EmbeddingProvider>,
    fields: Vec<&'static str>,
    field_embeddings: Vec<Vec<f32>>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl SemanticMatcher {
    /// Minimum cosine similarity for a candidate to be considered at all.
    /// A similarity exactly at the threshold is accepted.
    pub const DEFAULT_THRESHOLD: f64 = 0.3;

    /// Default number of candidates returned.
    pub const DEFAULT_TOP_K: usize = 5;

    /// Source-field embedding cache capacity.
    pub const CACHE_SIZE: usize = 1000;

    /// Encode the canonical schema once and build the matcher.
    pub async fn build(provider: Arc<dyn EmbeddingProvider>) -> Result<Self, MapperError> {
        let fields: Vec<&'static str> = CLAIMS_SCHEMA.iter().map(|f| f.name).collect();
        let descriptions: Vec<String> = CLAIMS_SCHEMA
            .iter()
            .map(|field| {
                let mut parts = vec![field.name.replace('_', " "), field.description.to_string()];
                parts.extend(
                    field
                        .aliases
                        .iter()
                        .take(3)
                        .map(|alias| alias.replace('_', " ")),
                );
                parts.join(" | ")
            })
            .collect();

        let field_embeddings = provider.embed(&descriptions).await?;
        if field_embeddings.len() != fields.len() {
            return Err(MapperError::Embedding(format!(
                "expected {} field embeddings, got {}",
                fields.len(),
                field_embeddings.len()
            )));
        }
        tracing::info!(fields = fields.len(), "semantic matcher initialized");

        Ok(Self {
            provider,
            fields,
            field_embeddings,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(Self::CACHE_SIZE).expect("nonzero cache size"),
            )),
        })
    }

    async fn encode_source(&self, source_field: &str) -> Result<Vec<f32>, MapperError> {
        let normalized = normalize_field_name(source_field);
        {
            let mut cache = self.cache.lock().await;
            if let Some(hit) = cache.get(&normalized) {
                return Ok(hit.clone());
            }
        }
        let mut embeddings = self.provider.embed(std::slice::from_ref(&normalized)).await?;
        let embedding = embeddings
            .pop()
            .ok_or_else(|| MapperError::Embedding("empty embedding response".into()))?;
        self.cache
            .lock()
            .await
            .put(normalized, embedding.clone());
        Ok(embedding)
    }

    /// Top-k canonical candidates for a source field, best first, filtered
    /// to `similarity >= min_similarity`.
    pub async fn find_candidates(
        &self,
        source_field: &str,
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<(String, f64)>, MapperError> {
        let source = self.encode_source(source_field).await?;
        let mut scored: Vec<(String, f64)> = self
            .fields
            .iter()
            .zip(self.field_embeddings.iter())
            .map(|(name, embedding)| ((*name).to_string(), cosine(&source, embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored.retain(|(_, score)| *score >= min_similarity);
        Ok(scored)
    }

    /// The single best candidate at or above the threshold.
    pub async fn best_match(
        &self,
        source_field: &str,
        min_similarity: f64,
    ) -> Result<Option<(String, f64)>, MapperError> {
        let mut candidates = self.find_candidates(source_field, 1, min_similarity).await?;
        Ok(candidates.drain(..).next())
    }
}

impl std::fmt::Debug for SemanticMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMatcher")
            .field("fields", &self.fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_splits_camel_and_snake() {
        assert_eq!(normalize_field_name("PatientMRN"), "Patient MRN");
        assert_eq!(normalize_field_name("member_id"), "member id");
        assert_eq!(normalize_field_name("serviceDate"), "service Date");
    }

    #[test]
    fn normalization_strips_prefixes() {
        assert_eq!(normalize_field_name("fld_member_id"), "member id");
        assert_eq!(normalize_field_name("dt_service"), "service");
        assert_eq!(normalize_field_name("cd_procedure"), "procedure");
        // A prefix without separator is left alone.
        assert_eq!(normalize_field_name("dtservice"), "dtservice");
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    /// Deterministic provider: embeds each text as a bag-of-characters
    /// histogram so related names land near each other.
    struct HistogramProvider;

    #[async_trait]
    impl EmbeddingProvider for HistogramProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MapperError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 27];
                    for c in t.to_lowercase().chars() {
                        if c.is_ascii_lowercase() {
                            v[(c as usize) - ('a' as usize)] += 1.0;
                        } else if c == ' ' {
                            v[26] += 1.0;
                        }
                    }
                    v
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn candidates_are_sorted_and_thresholded() {
        let matcher = SemanticMatcher::build(Arc::new(HistogramProvider)).await.unwrap();
        let candidates = matcher.find_candidates("member identifier", 5, 0.0).await.unwrap();
        assert_eq!(candidates.len(), 5);
        for window in candidates.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }

        // An impossible threshold filters everything out.
        let none = matcher.find_candidates("member identifier", 5, 1.01).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn threshold_boundary_is_inclusive() {
        let matcher = SemanticMatcher::build(Arc::new(HistogramProvider)).await.unwrap();
        let all = matcher.find_candidates("member id", 1, 0.0).await.unwrap();
        let top_score = all[0].1;
        // Exactly the top score as threshold still admits the match.
        let at_boundary = matcher.find_candidates("member id", 1, top_score).await.unwrap();
        assert_eq!(at_boundary.len(), 1);
    }

    #[tokio::test]
    async fn cache_serves_repeat_lookups() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingProvider(AtomicUsize);

        #[async_trait]
        impl EmbeddingProvider for CountingProvider {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MapperError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let matcher = SemanticMatcher::build(provider.clone()).await.unwrap();
        let after_build = provider.0.load(Ordering::SeqCst);

        matcher.find_candidates("SameField", 3, 0.0).await.unwrap();
        matcher.find_candidates("SameField", 3, 0.0).await.unwrap();
        // Second lookup is a cache hit: exactly one additional embed call.
        assert_eq!(provider.0.load(Ordering::SeqCst), after_build + 1);
    }
}
