//! Abstractions for text generation via local or hosted providers.
//!
//! The summarizers and the question-answering flow only see [`GenerationClient`]; provider
//! adapters issue HTTP requests directly to their runtimes. Per-call timeouts are applied here,
//! at the boundary, so the algorithms above never carry their own timing logic.

mod ollama;
mod openai;

pub use ollama::OllamaGenerationClient;
pub use openai::OpenAiGenerationClient;

use crate::config::{Config, GenerationProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while attempting text generation.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider was unreachable.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate text: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// The call did not finish within the configured timeout.
    #[error("Generation call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Request payload passed to a generation provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Fully rendered prompt.
    pub prompt: String,
    /// Sampling temperature; `0.0` asks for deterministic output.
    pub temperature: f32,
    /// Output token cap.
    pub max_output_tokens: u32,
}

/// Parameters applied to every generation call of an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token cap.
    pub max_output_tokens: u32,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: 1000,
            timeout: Duration::from_secs(120),
        }
    }
}

impl GenerationSettings {
    /// Wrap a rendered prompt into a request carrying these parameters.
    pub fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            prompt,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Interface implemented by text-generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for the supplied prompt.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError>;
}

/// Render-and-call helper: issue one generation call bounded by the settings' timeout.
pub async fn generate_with_timeout(
    client: &dyn GenerationClient,
    settings: &GenerationSettings,
    prompt: String,
) -> Result<String, GenerationClientError> {
    let request = settings.request(prompt);
    match tokio::time::timeout(settings.timeout, client.generate(request)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout = ?settings.timeout, "Generation call timed out");
            Err(GenerationClientError::TimedOut(settings.timeout))
        }
    }
}

/// Build a generation client based on configuration.
pub fn build_generation_client(config: &Config) -> Arc<dyn GenerationClient> {
    match config.generation_provider {
        GenerationProvider::Ollama => Arc::new(OllamaGenerationClient::new(
            config.ollama_url.clone(),
            config.generation_model.clone(),
        )),
        GenerationProvider::OpenAI => Arc::new(OpenAiGenerationClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone().unwrap_or_default(),
            config.generation_model.clone(),
        )),
    }
}
