//! OpenAI `/v1/embeddings` adapter.

use super::{EmbedderDescriptor, EmbeddingClient, EmbeddingClientError, check_embeddings};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Embedding client backed by an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    descriptor: EmbedderDescriptor,
}

impl OpenAiEmbeddingClient {
    /// Build a client for the API rooted at `base_url`; each request is bounded by `timeout`.
    pub fn new(
        base_url: String,
        api_key: String,
        descriptor: EmbedderDescriptor,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .user_agent("rusty-reader/embed")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url,
            api_key,
            descriptor,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
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
            "Requesting OpenAI embeddings"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.descriptor.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let mut body: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode embeddings response: {error}"
            ))
        })?;

        body.data.sort_by_key(|item| item.index);
        let embeddings: Vec<Vec<f32>> = body
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect();
        check_embeddings(&self.descriptor, requested, &embeddings)?;
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn openai_client_sorts_by_response_index() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.3, 0.4] },
                        { "index": 0, "embedding": [0.1, 0.2] }
                    ]
                }));
            })
            .await;

        let client = OpenAiEmbeddingClient::new(
            server.base_url(),
            "sk-test".into(),
            EmbedderDescriptor {
                provider: "openai".into(),
                model: "text-embedding-ada-002".into(),
                dimension: 2,
            },
            Duration::from_secs(5),
        );
        let vectors = client
            .generate_embeddings(vec!["first".into(), "second".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn openai_client_skips_request_for_empty_input() {
        let client = OpenAiEmbeddingClient::new(
            "http://127.0.0.1:9".into(),
            "sk-test".into(),
            EmbedderDescriptor {
                provider: "openai".into(),
                model: "text-embedding-ada-002".into(),
                dimension: 2,
            },
            Duration::from_secs(5),
        );
        let vectors = client.generate_embeddings(Vec::new()).await.expect("empty");
        assert!(vectors.is_empty());
    }
}
