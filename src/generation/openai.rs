//! OpenAI chat completions adapter.

use super::{GenerationClient, GenerationClientError, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Generation client backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiGenerationClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerationClient {
    /// Build a client for `model` served by the API rooted at `base_url`.
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("rusty-reader/generate")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": request.prompt }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!(
                "failed to decode chat completion: {error}"
            ))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                GenerationClientError::InvalidResponse("chat completion had no content".into())
            })
    }
}
