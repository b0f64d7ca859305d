use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::generation::GenerationSettings;
use crate::processing::{ChunkingSettings, SummarizeSettings};

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for Rusty Reader.
///
/// Loaded once by the binaries and then split into the immutable settings values each
/// operation receives; nothing reads it through a global.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory for vector collections and persisted summaries.
    pub db_dir: PathBuf,
    /// Collection used when a request does not name one.
    pub default_collection: String,
    /// Characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks.
    pub chunk_overlap: usize,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of texts sent per embedding request.
    pub embedding_batch_size: usize,
    /// Timeout in seconds for each embedding request.
    pub embedding_timeout_secs: u64,
    /// Text-generation provider.
    pub generation_provider: GenerationProvider,
    /// Generation model identifier passed to the provider.
    pub generation_model: String,
    /// Sampling temperature for every generation call.
    pub generation_temperature: f32,
    /// Output token cap for every generation call.
    pub generation_max_tokens: u32,
    /// Per-call timeout in seconds.
    pub generation_timeout_secs: u64,
    /// Maximum number of in-flight map calls.
    pub map_concurrency: usize,
    /// Token budget for a single combine prompt before tree reduction kicks in.
    pub reduce_token_budget: usize,
    /// Upper bound on collapse rounds during tree reduction.
    pub reduce_max_collapse_rounds: usize,
    /// Default number of chunks retrieved per question.
    pub retrieval_top_k: usize,
    /// Vector store backend.
    pub vector_store: VectorStoreKind,
    /// Base URL of the Qdrant instance, when that backend is selected.
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Timeout in seconds for each Qdrant request.
    pub qdrant_timeout_secs: u64,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// API key for the OpenAI-compatible API.
    pub openai_api_key: Option<String>,
    /// Directory holding `<template_name>.txt` prompt overrides.
    pub prompt_template_dir: Option<PathBuf>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic byte-hashing embedder that needs no service.
    Hashing,
}

/// Supported text-generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI chat completions API.
    OpenAI,
}

/// Supported vector store backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    /// JSON files under `db_dir`, one directory per collection.
    Local,
    /// Remote Qdrant instance.
    Qdrant,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            db_dir: PathBuf::from(load_env_or("READER_DB_DIR", "db")),
            default_collection: load_env_or("READER_COLLECTION", "default"),
            chunk_size: parse_env_or("CHUNK_SIZE", 1000)?,
            chunk_overlap: parse_env_or("CHUNK_OVERLAP", 0)?,
            embedding_provider: parse_env_or("EMBEDDING_PROVIDER", EmbeddingProvider::Ollama)?,
            embedding_model: load_env_or("EMBEDDING_MODEL", "nomic-embed-text"),
            embedding_dimension: parse_env_or("EMBEDDING_DIMENSION", 768)?,
            embedding_batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 64)?,
            embedding_timeout_secs: parse_env_or("EMBEDDING_TIMEOUT_SECS", 60)?,
            generation_provider: parse_env_or("GENERATION_PROVIDER", GenerationProvider::Ollama)?,
            generation_model: load_env_or("GENERATION_MODEL", "llama3.1"),
            generation_temperature: parse_env_or("GENERATION_TEMPERATURE", 0.0)?,
            generation_max_tokens: parse_env_or("GENERATION_MAX_TOKENS", 1000)?,
            generation_timeout_secs: parse_env_or("GENERATION_TIMEOUT_SECS", 120)?,
            map_concurrency: parse_env_or("MAP_CONCURRENCY", 4)?,
            reduce_token_budget: parse_env_or("REDUCE_TOKEN_BUDGET", 3000)?,
            reduce_max_collapse_rounds: parse_env_or("REDUCE_MAX_COLLAPSE_ROUNDS", 3)?,
            retrieval_top_k: parse_env_or("RETRIEVAL_TOP_K", 4)?,
            vector_store: parse_env_or("VECTOR_STORE", VectorStoreKind::Local)?,
            qdrant_url: load_env_optional("QDRANT_URL"),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            qdrant_timeout_secs: parse_env_or("QDRANT_TIMEOUT_SECS", 30)?,
            ollama_url: load_env_or("OLLAMA_URL", DEFAULT_OLLAMA_URL),
            openai_base_url: load_env_or("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            prompt_template_dir: load_env_optional("PROMPT_TEMPLATE_DIR").map(PathBuf::from),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that single-variable parsing cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_BATCH_SIZE".into()));
        }
        if self.map_concurrency == 0 {
            return Err(ConfigError::InvalidValue("MAP_CONCURRENCY".into()));
        }
        if self.vector_store == VectorStoreKind::Qdrant && self.qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }
        if (self.embedding_provider == EmbeddingProvider::OpenAI
            || self.generation_provider == GenerationProvider::OpenAI)
            && self.openai_api_key.is_none()
        {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }
        Ok(())
    }

    /// Chunker parameters derived from this configuration.
    pub fn chunking(&self) -> ChunkingSettings {
        ChunkingSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    /// Parameters applied to every generation call.
    pub fn generation(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.generation_temperature,
            max_output_tokens: self.generation_max_tokens,
            timeout: Duration::from_secs(self.generation_timeout_secs.max(1)),
        }
    }

    /// Bound on a single embedding request.
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs.max(1))
    }

    /// Bound on a single Qdrant request.
    pub fn qdrant_timeout(&self) -> Duration {
        Duration::from_secs(self.qdrant_timeout_secs.max(1))
    }

    /// Summarization parameters derived from this configuration.
    pub fn summarize(&self) -> SummarizeSettings {
        SummarizeSettings {
            generation: self.generation(),
            map_concurrency: self.map_concurrency,
            reduce_token_budget: self.reduce_token_budget,
            reduce_max_collapse_rounds: self.reduce_max_collapse_rounds,
            token_model: self.generation_model.clone(),
        }
    }
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

/// Load `.env` (when present) and read the configuration from the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        db_dir = %config.db_dir.display(),
        collection = %config.default_collection,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        embedding_provider = ?config.embedding_provider,
        generation_provider = ?config.generation_provider,
        vector_store = ?config.vector_store,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
pub(crate) fn test_config(db_dir: PathBuf) -> Config {
    Config {
        db_dir,
        default_collection: "default".into(),
        chunk_size: 1000,
        chunk_overlap: 0,
        embedding_provider: EmbeddingProvider::Hashing,
        embedding_model: "hashing".into(),
        embedding_dimension: 64,
        embedding_batch_size: 8,
        embedding_timeout_secs: 5,
        generation_provider: GenerationProvider::Ollama,
        generation_model: "test-model".into(),
        generation_temperature: 0.0,
        generation_max_tokens: 256,
        generation_timeout_secs: 5,
        map_concurrency: 2,
        reduce_token_budget: 3000,
        reduce_max_collapse_rounds: 3,
        retrieval_top_k: 4,
        vector_store: VectorStoreKind::Local,
        qdrant_url: None,
        qdrant_api_key: None,
        qdrant_timeout_secs: 5,
        ollama_url: DEFAULT_OLLAMA_URL.into(),
        openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
        openai_api_key: None,
        prompt_template_dir: None,
        server_port: None,
    }
}
