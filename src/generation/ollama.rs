//! Ollama `/api/generate` adapter.

use super::{GenerationClient, GenerationClientError, GenerationRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Generation client backed by a local Ollama runtime.
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerationClient {
    /// Build a client for `model` served by the Ollama runtime at `base_url`.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("rusty-reader/generate")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_output_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Summarize".into(),
            temperature: 0.0,
            max_output_tokens: 100,
        }
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama".into());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model":"llama","stream":false,"options":{"num_predict":100}}"#);
                then.status(200).json_body(json!({
                    "response": " Summary text\n",
                    "done": true
                }));
            })
            .await;

        let summary = client.generate(request()).await.expect("summary");

        mock.assert();
        assert_eq!(summary, "Summary text");
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama".into());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client.generate(request()).await.expect_err("error response");

        assert!(
            matches!(error, GenerationClientError::GenerationFailed(ref message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn ollama_client_rejects_incomplete_response() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama".into());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = client.generate(request()).await.expect_err("incomplete");
        assert!(matches!(error, GenerationClientError::InvalidResponse(_)));
    }
}
