//! Embedding boundary: text in, fixed-dimension vectors out.
//!
//! The pipeline never talks to a model directly; everything goes through
//! [`EmbeddingProvider`], constructed once at startup and passed by `Arc`.
//! Two implementations ship here: an HTTP client for OpenAI-compatible
//! `/v1/embeddings` endpoints and a deterministic mock for tests and offline
//! runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::SalmonError;

/// Produces fixed-dimension embedding vectors for text.
///
/// Implementations must be pure functions of the input text (same text, same
/// vector) and must preserve input order in [`embed_batch`].
///
/// [`embed_batch`]: EmbeddingProvider::embed_batch
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short identifier for logs and telemetry.
    fn name(&self) -> &str;

    /// Output dimension; constant for the lifetime of the provider and must
    /// match the dimension recorded in the store at creation time.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, preserving order: `result[i]` belongs to
    /// `inputs[i]`.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SalmonError>;

    /// Embed a single text.
    async fn embed(&self, input: &str) -> Result<Vec<f32>, SalmonError> {
        let mut vectors = self.embed_batch(&[input.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SalmonError::Upstream("embedding provider returned no vector".into()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible embedding endpoints (OpenAI, Ollama,
/// llama.cpp server, and friends).
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl OpenAiEmbeddingProvider {
    /// Builds a provider for `{base_url}/v1/embeddings`.
    ///
    /// `dimensions` is the vector size the endpoint is expected to return;
    /// responses with any other length are rejected so a misconfigured model
    /// cannot poison the index.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Result<Self, SalmonError> {
        if dimensions == 0 {
            return Err(SalmonError::InvalidInput(
                "embedding dimension must be positive".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("salmon-search/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            dimensions,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SalmonError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?.error_for_status()?;
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| SalmonError::Upstream(format!("bad embedding response: {err}")))?;

        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return Err(SalmonError::Upstream(format!(
                "embedding endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        for entry in &parsed.data {
            if entry.embedding.len() != self.dimensions {
                return Err(SalmonError::Upstream(format!(
                    "embedding endpoint returned dimension {}, expected {}",
                    entry.embedding.len(),
                    self.dimensions
                )));
            }
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

/// Deterministic embedding provider for tests and offline pipelines.
///
/// Words are hashed into a fixed number of buckets and the resulting
/// bag-of-words vector is L2-normalized, so texts sharing words land closer
/// together than unrelated texts. Not a semantic model, but stable across
/// runs and good enough to exercise ranking end to end.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    /// 384 buckets, matching the MiniLM vector size the real deployment uses.
    pub fn new() -> Self {
        Self { dimensions: 384 }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SalmonError> {
        Ok(inputs.iter().map(|text| self.encode(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::with_dimensions(64);
        let inputs = vec![
            "Hello world".to_string(),
            "Goodbye world".to_string(),
            "Hello world".to_string(),
        ];

        let first = provider.embed_batch(&inputs).await.unwrap();
        let second = provider.embed_batch(&inputs).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0], first[2], "identical text, identical vector");
        assert_ne!(first[0], first[1], "different text, different vector");
    }

    #[tokio::test]
    async fn mock_embeddings_have_fixed_dimension_and_unit_norm() {
        let provider = MockEmbeddingProvider::new();
        let vector = provider.embed("salmon swim upstream").await.unwrap();

        assert_eq!(vector.len(), provider.dimensions());
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn word_overlap_shrinks_distance() {
        let provider = MockEmbeddingProvider::new();
        let query = provider.embed("where do salmon live").await.unwrap();
        let relevant = provider.embed("salmon live in rivers").await.unwrap();
        let unrelated = provider.embed("compilers translate programs").await.unwrap();

        let dist = |a: &[f32], b: &[f32]| -> f32 {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt()
        };
        assert!(dist(&query, &relevant) < dist(&query, &unrelated));
    }
}
