//! Embeddings API client.

use async_trait::async_trait;
use intake_mapper::{EmbeddingProvider, MapperError};

/// Default embedding model used when none is configured.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embeddings endpoint base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Client for an OpenAI-compatible embeddings endpoint.
///
/// Implements [`EmbeddingProvider`] for the field mapper's semantic rung.
/// The model selector normally comes from `EMBEDDING_MODEL`.
pub struct HttpEmbeddings {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpEmbeddings {
    /// Create a new client with the given API key and defaults.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the embedding model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the base URL. Useful for self-hosted embedding servers and
    /// mock servers in tests.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Build the embeddings endpoint URL.
    pub(crate) fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, MapperError> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| MapperError::Embedding("missing 'data' array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item["embedding"]
            .as_array()
            .ok_or_else(|| {
                MapperError::Embedding("missing 'embedding' array in data item".to_string())
            })?
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    MapperError::Embedding("non-numeric value in embedding".to_string())
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;
        embeddings.push(embedding);
    }
    Ok(embeddings)
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddings {
    /// Embed each input text via `POST {base_url}/v1/embeddings`.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MapperError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        tracing::debug!(url = %self.embeddings_url(), model = %self.model, count = texts.len(),
            "sending embedding request");

        let response = self
            .client
            .post(self.embeddings_url())
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MapperError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MapperError::Embedding(format!("body read failed: {e}")))?;

        if !status.is_success() {
            return Err(MapperError::Embedding(format!(
                "embeddings endpoint returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| MapperError::Embedding(format!("invalid JSON response: {e}")))?;
        let embeddings = parse_embedding_response(&json)?;

        if embeddings.len() != texts.len() {
            return Err(MapperError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}
