//! Embedding vectors and the providers that produce them.

use std::sync::Arc;
use std::time::Duration;

use agent_store::http::JsonClient;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use tracing::debug;

use crate::{MemoryError, MemoryResult};

/// Dimension of the default sentence-embedding model.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Wrapper type around an immutable floating-point embedding.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] when the supplied vector is empty
    /// or contains non-finite values.
    pub fn new(values: Vec<f32>) -> MemoryResult<Self> {
        if values.is_empty() {
            return Err(MemoryError::embedding("embedding vector must not be empty"));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(MemoryError::embedding(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Creates an embedding by copying the provided slice.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] if the slice is empty or contains
    /// non-finite values.
    pub fn from_slice(values: &[f32]) -> MemoryResult<Self> {
        Self::new(values.to_vec())
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false`; empty embeddings are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in `[-1, 1]`; `0.0` when either side has no magnitude
    /// or the dimensions differ.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.len() != other.len() {
            return 0.0;
        }
        let denominator = self.magnitude() * other.magnitude();
        if denominator == 0.0 {
            0.0
        } else {
            self.dot(other) / denominator
        }
    }

    fn dot(&self, other: &Self) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    fn magnitude(&self) -> f32 {
        self.values
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt()
    }
}

impl std::fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

/// Text to fixed-length vector capability used by the semantic index.
///
/// Implementations are deterministic for a given model and never retry.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `text`.
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector>;

    /// Returns the dimension of every produced vector.
    fn dimensions(&self) -> usize;
}

/// Offline embedder using signed feature hashing over lower-cased word tokens.
///
/// Texts sharing vocabulary land close together, which is enough for local
/// recall and tests without a model server.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    /// Creates an embedder producing `dimensions`-long vectors.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for a zero dimension.
    pub fn new(dimensions: usize) -> MemoryResult<Self> {
        if dimensions == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding dimension must be positive",
            ));
        }
        Ok(Self { dimensions })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0_f32; self.dimensions];
        for token in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            // Both casts are lossless: the modulus is bounded by `dimensions`.
            #[allow(clippy::cast_possible_truncation)]
            let slot = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            values[slot] += sign;
        }

        let norm = values.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut values {
                *value /= norm;
            }
        }
        values
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        let values = self.vectorize(text);
        if values.iter().all(|value| *value == 0.0) {
            return Err(MemoryError::embedding("text has no embeddable tokens"));
        }
        EmbeddingVector::new(values)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Settings for [`HttpEmbedder`].
#[derive(Clone)]
pub struct HttpEmbedderConfig {
    base_url: String,
    path: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    timeout: Duration,
}

impl std::fmt::Debug for HttpEmbedderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedderConfig")
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl HttpEmbedderConfig {
    /// Targets an OpenAI-compatible service rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: "embeddings".to_owned(),
            model: "all-minilm".to_owned(),
            api_key: None,
            dimensions: DEFAULT_DIMENSIONS,
            timeout: Duration::from_secs(5),
        }
    }

    /// Overrides the request path relative to the base URL.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the expected vector dimension.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Embedder calling a remote model server.
///
/// Accepts the OpenAI `{"data": [{"embedding": [...]}]}` answer as well as
/// Ollama's `{"embedding": [...]}` and `{"embeddings": [[...]]}` shapes.
#[derive(Debug)]
pub struct HttpEmbedder {
    client: JsonClient,
    path: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Creates the embedder. No request is sent until first use.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] for a malformed URL or API key.
    pub fn new(config: &HttpEmbedderConfig) -> MemoryResult<Self> {
        let mut client = JsonClient::new(&config.base_url, config.timeout)?;
        if let Some(api_key) = &config.api_key {
            client = client.with_header("authorization", &format!("Bearer {api_key}"))?;
        }
        Ok(Self {
            client,
            path: config.path.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        if text.trim().is_empty() {
            return Err(MemoryError::embedding("text must not be empty"));
        }
        let body = json!({ "model": self.model, "input": text, "prompt": text });
        let response = self
            .client
            .post(&self.path, &body)
            .await
            .map_err(|err| MemoryError::embedding(format!("embedding request failed: {err}")))?;

        let values = extract_embedding(response)?;
        if values.len() != self.dimensions {
            return Err(MemoryError::embedding(format!(
                "model `{}` returned {} dimensions, expected {}",
                self.model,
                values.len(),
                self.dimensions
            )));
        }
        debug!(model = %self.model, dimensions = values.len(), "embedded text");
        EmbeddingVector::new(values)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    OpenAi { data: Vec<OpenAiDatum> },
    Single { embedding: Vec<f32> },
    Batch { embeddings: Vec<Vec<f32>> },
}

#[derive(Deserialize)]
struct OpenAiDatum {
    embedding: Vec<f32>,
}

fn extract_embedding(response: Value) -> MemoryResult<Vec<f32>> {
    let parsed: EmbeddingResponse = serde_json::from_value(response)
        .map_err(|err| MemoryError::embedding(format!("unrecognised embedding response: {err}")))?;
    let values = match parsed {
        EmbeddingResponse::OpenAi { data } => data.into_iter().next().map(|datum| datum.embedding),
        EmbeddingResponse::Single { embedding } => Some(embedding),
        EmbeddingResponse::Batch { embeddings } => embeddings.into_iter().next(),
    };
    values.ok_or_else(|| MemoryError::embedding("embedding response carried no vectors"))
}
