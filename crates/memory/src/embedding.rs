//! Embedding backends.
//!
//! The semantic store compares vectors; the assembler only needs to turn the
//! query into one. Three backends are available:
//!
//! - [`HttpEmbedder`]: OpenAI-compatible `/v1/embeddings` (also Ollama)
//! - [`HashingEmbedder`]: deterministic feature hashing, fully offline
//! - `FastEmbedder`: local ONNX models, behind the `fastembed` feature

use std::sync::Arc;

use async_trait::async_trait;
use cortex_common::CortexError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use xxhash_rust::xxh64::xxh64;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Failed to generate embeddings: {0}")]
    Generation(String),

    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl From<EmbeddingError> for CortexError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::ModelInit(msg) => CortexError::Config(msg),
            other => CortexError::MemoryUnavailable(other.to_string()),
        }
    }
}

/// Maps text to a fixed-size vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Output size; fixed per deployment.
    fn dimension(&self) -> usize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "http", "hashing" or "fastembed"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_provider() -> String {
    "hashing".into()
}

fn default_model() -> String {
    "all-MiniLM-L6-v2".into()
}

fn default_dimension() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_url: None,
            api_key: None,
            dimension: default_dimension(),
        }
    }
}

/// Build the configured embedder.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    if config.dimension == 0 {
        return Err(EmbeddingError::ModelInit(
            "embedding dimension must be positive".into(),
        ));
    }
    info!(
        provider = %config.provider,
        model = %config.model,
        dimension = config.dimension,
        "Configuring embedder"
    );
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        "http" => {
            let base_url = config
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Arc::new(
                HttpEmbedder::new(base_url, config.model.clone(), config.dimension)
                    .with_api_key(config.api_key.clone()),
            ))
        }
        #[cfg(feature = "fastembed")]
        "fastembed" => Ok(Arc::new(FastEmbedder::from_config(
            &config.model,
            config.dimension,
        )?)),
        other => Err(EmbeddingError::ModelInit(format!(
            "Unknown embedding provider: '{other}'"
        ))),
    }
}

/// Feature-hashing bag of words.
///
/// Each term is hashed into a bucket with a sign bit; the result is
/// L2-normalised so cosine similarity reflects shared vocabulary.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
        {
            let token = token.to_lowercase();
            let h = xxh64(token.as_bytes(), 0);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            dimension,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/embeddings", self.base_url)
        } else {
            format!("{}/v1/embeddings", self.base_url)
        }
    }

    fn check(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Generation("Empty embedding result".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(self.endpoint()).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(format!("{} unreachable: {e}", self.base_url)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!("{status}: {body}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("Invalid embeddings response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Generation(format!(
                "Requested {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        for v in &vectors {
            self.check(v)?;
        }

        debug!(batch_size = vectors.len(), dimension = self.dimension, "Generated embeddings");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(feature = "fastembed")]
pub use local::FastEmbedder;

#[cfg(feature = "fastembed")]
mod local {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use tokio::task;
    use tracing::{debug, info, instrument};

    use super::{Embedder, EmbeddingError};

    /// Local ONNX embedding model, loaded on first use.
    pub struct FastEmbedder {
        model_name: EmbeddingModel,
        dimension: usize,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl FastEmbedder {
        pub fn from_model_str(model_name: &str) -> Result<Self, EmbeddingError> {
            let (model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "all-MiniLM-L12-v2" | "AllMiniLML12V2" => (EmbeddingModel::AllMiniLML12V2, 384),
                "bge-small-en-v1.5" | "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" | "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
                "bge-large-en-v1.5" | "BGELargeENV15" => (EmbeddingModel::BGELargeENV15, 1024),
                "nomic-embed-text-v1.5" | "NomicEmbedTextV15" => {
                    (EmbeddingModel::NomicEmbedTextV15, 768)
                }
                "multilingual-e5-small" | "MultilingualE5Small" => {
                    (EmbeddingModel::MultilingualE5Small, 384)
                }
                _ => {
                    return Err(EmbeddingError::ModelInit(format!(
                        "Unknown embedding model: '{model_name}'"
                    )));
                }
            };
            Ok(Self {
                model_name: model,
                dimension,
                model: OnceCell::new(),
            })
        }

        /// Load by name, checking the model's size against the deployment's.
        pub fn from_config(model_name: &str, expected_dim: usize) -> Result<Self, EmbeddingError> {
            let embedder = Self::from_model_str(model_name)?;
            if embedder.dimension != expected_dim {
                return Err(EmbeddingError::ModelInit(format!(
                    "Dimension mismatch: model '{}' produces {}-dim vectors but config specifies {}",
                    model_name, embedder.dimension, expected_dim
                )));
            }
            Ok(embedder)
        }

        #[instrument(skip(self))]
        fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>, EmbeddingError> {
            self.model
                .get_or_try_init(|| {
                    info!(model = ?self.model_name, "Initializing embedding model");
                    let options = InitOptions::new(self.model_name.clone());
                    let model = TextEmbedding::try_new(options)
                        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
                    Ok(Arc::new(model))
                })
                .cloned()
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.embed_batch(&[text])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::Generation("Empty embedding result".into()))
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.get_or_init_model()?;
            let texts: Vec<String> = texts.iter().map(|s| s.to_string()).collect();

            // fastembed is synchronous
            let embeddings = task::spawn_blocking(move || {
                model
                    .embed(texts, None)
                    .map_err(|e| EmbeddingError::Generation(e.to_string()))
            })
            .await??;

            debug!(batch_size = embeddings.len(), "Generated local embeddings");
            Ok(embeddings)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

}
