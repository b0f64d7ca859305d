//! Embedding client abstraction and adapters.
//!
//! Every collection records the [`EmbedderDescriptor`] of the client that built it, so a query
//! issued through a different model or dimension is rejected instead of silently ranking
//! vectors from two embedding spaces against each other.

mod ollama;
mod openai;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unreachable.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed or did not match the request.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Identity of an embedding space: who produced the vectors and how long they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderDescriptor {
    /// Provider name (`ollama`, `openai`, `hashing`).
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Length of every produced vector.
    pub dimension: usize,
}

impl std::fmt::Display for EmbedderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({} dims)", self.provider, self.model, self.dimension)
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embedding space produced by this client.
    fn descriptor(&self) -> &EmbedderDescriptor;

    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic embedding client that hashes bytes into vector slots.
///
/// Needs no external service, which makes it the embedder of choice for offline runs and tests.
/// Similar byte content yields similar vectors, nothing more.
pub struct HashingEmbeddingClient {
    descriptor: EmbedderDescriptor,
}

impl HashingEmbeddingClient {
    /// Construct a hashing client producing vectors of `dimension` slots.
    pub fn new(dimension: usize) -> Self {
        Self {
            descriptor: EmbedderDescriptor {
                provider: "hashing".into(),
                model: "byte-hash".into(),
                dimension,
            },
        }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() || dimension == 0 {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            if let Some(slot) = embedding.get_mut(idx % dimension) {
                *slot += f32::from(byte) / 255.0;
            }
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let dimension = self.descriptor.dimension;
        if dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::trace!(texts = texts.len(), dimension, "Hashing embeddings");
        Ok(texts
            .iter()
            .map(|text| Self::encode(text, dimension))
            .collect())
    }
}

/// Build an embedding client suitable for the given configuration.
pub fn build_embedding_client(config: &Config) -> Arc<dyn EmbeddingClient> {
    let descriptor = |provider: &str| EmbedderDescriptor {
        provider: provider.into(),
        model: config.embedding_model.clone(),
        dimension: config.embedding_dimension,
    };

    match config.embedding_provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbeddingClient::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            descriptor("ollama"),
            config.embedding_timeout(),
        )),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone().unwrap_or_default(),
            descriptor("openai"),
            config.embedding_timeout(),
        )),
    }
}

/// Verify a provider returned one vector per input, each of the advertised dimension.
pub(crate) fn check_embeddings(
    descriptor: &EmbedderDescriptor,
    requested: usize,
    embeddings: &[Vec<f32>],
) -> Result<(), EmbeddingClientError> {
    if embeddings.len() != requested {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "expected {requested} vectors, received {}",
            embeddings.len()
        )));
    }
    if let Some(vector) = embeddings
        .iter()
        .find(|vector| vector.len() != descriptor.dimension)
    {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "model '{}' returned {} dimensions, expected {}",
            descriptor.model,
            vector.len(),
            descriptor.dimension
        )));
    }
    Ok(())
}
