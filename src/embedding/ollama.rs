//! Ollama `/api/embed` adapter.

use super::{EmbedderDescriptor, EmbeddingClient, EmbeddingClientError, check_embeddings};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Embedding client backed by a local Ollama runtime.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    descriptor: EmbedderDescriptor,
}

impl OllamaEmbeddingClient {
    /// Build a client for the Ollama runtime at `base_url`; each request is bounded by `timeout`.
    pub fn new(base_url: String, descriptor: EmbedderDescriptor, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("rusty-reader/embed")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url,
            descriptor,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let requested = texts.len();
        tracing::debug!(
            model = %self.descriptor.model,
            texts = requested,
            "Requesting Ollama embeddings"
        );

        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({
                "model": self.descriptor.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        check_embeddings(&self.descriptor, requested, &body.embeddings)?;
        Ok(body.embeddings)
    }
}
