//! Core data types and error definitions for the reading pipeline.

use crate::{
    document::LoaderError,
    generation::GenerationClientError,
    index::IndexError,
    processing::{prompt::PromptError, results::ResultStoreError},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Half-open `[start, end)` range of character offsets into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    /// First character covered.
    pub start: usize,
    /// One past the last character covered.
    pub end: usize,
}

/// Ordered slice of a document. `index` is the key every derived artifact is joined on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Ordinal position in the document.
    pub index: usize,
    /// Chunk text.
    pub text: String,
    /// Characters of the source text this chunk covers.
    pub char_span: CharSpan,
}

/// A chunk shown side by side with the summary derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummary {
    /// Index of the chunk the summary belongs to.
    pub chunk_index: usize,
    /// Original chunk text.
    pub chunk_content: String,
    /// Partial summary (map-reduce) or running summary after this chunk (refine).
    pub chunk_summary: String,
}

/// Whole-document summary plus the per-chunk trail that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// Final summary of the document.
    pub total_summary: String,
    /// Per-chunk summaries in chunk order.
    pub chunk_summaries: Vec<ChunkSummary>,
}

/// Generated answer and the evidence it was generated from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Generated answer text.
    pub text: String,
    /// Retrieved chunks, most relevant first.
    pub source_chunks: Vec<Chunk>,
}

/// Errors produced while splitting text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A zero-length window cannot make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave a positive stride between windows.
    #[error("chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge {
        /// Requested overlap.
        chunk_overlap: usize,
        /// Requested chunk size.
        chunk_size: usize,
    },
}

/// Errors emitted by either summarization strategy.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// A template references a variable the strategy does not supply.
    #[error("Invalid prompt template: {0}")]
    Prompt(#[from] PromptError),
    /// Generating the summary for one chunk failed; the whole run is aborted.
    #[error("Generation failed for chunk {chunk_index}: {source}")]
    ChunkGeneration {
        /// Chunk whose call failed.
        chunk_index: usize,
        /// Provider error.
        #[source]
        source: GenerationClientError,
    },
    /// Combining partial summaries failed.
    #[error("Generation failed while combining summaries: {0}")]
    Combine(#[source] GenerationClientError),
    /// The caller cancelled the run.
    #[error("Summarization cancelled after {completed} of {total} chunks")]
    Cancelled {
        /// Chunks fully processed before cancellation was observed.
        completed: usize,
        /// Chunks in the document.
        total: usize,
    },
}

/// Errors emitted while answering a question.
#[derive(Debug, Error)]
pub enum QaError {
    /// Retrieval failed.
    #[error("Retrieval failed: {0}")]
    Index(#[from] IndexError),
    /// The query template references an unknown variable.
    #[error("Invalid prompt template: {0}")]
    Prompt(#[from] PromptError),
    /// The answer-generation call failed.
    #[error("Answer generation failed: {0}")]
    Generation(#[from] GenerationClientError),
}

/// Caller-facing classification of every failure the reader can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad chunk size/overlap, bad collection name, or a template missing a variable.
    InvalidConfiguration,
    /// The document loader failed.
    UnreadableDocument,
    /// The embedding service failed.
    EmbeddingFailure,
    /// The generation service failed or timed out.
    GenerationFailure,
    /// The persisted summary is missing or malformed.
    CorruptOrMissingArtifact,
    /// The collection was built with a different embedder.
    IndexMismatch,
    /// The caller cancelled the operation.
    Cancelled,
    /// Local or remote storage failed.
    Storage,
}

/// Errors surfaced by [`crate::processing::ReaderService`].
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Chunker parameters were rejected.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    /// A template could not be rendered.
    #[error("Invalid prompt template: {0}")]
    Prompt(#[from] PromptError),
    /// The document could not be loaded.
    #[error("Unreadable document: {0}")]
    Document(#[from] LoaderError),
    /// Building or querying the vector index failed.
    #[error("Vector index failure: {0}")]
    Index(#[from] IndexError),
    /// Summarization failed.
    #[error("Summarization failed: {0}")]
    Summarize(#[from] SummarizeError),
    /// Question answering failed.
    #[error("Question answering failed: {0}")]
    Qa(#[from] QaError),
    /// Saving or loading the summary artifact failed.
    #[error("Summary artifact failure: {0}")]
    Results(#[from] ResultStoreError),
}

impl ReaderError {
    /// Map this error onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Chunking(_) | Self::Prompt(_) => ErrorKind::InvalidConfiguration,
            Self::Document(_) => ErrorKind::UnreadableDocument,
            Self::Index(error) => error.kind(),
            Self::Summarize(SummarizeError::Prompt(_)) => ErrorKind::InvalidConfiguration,
            Self::Summarize(SummarizeError::Cancelled { .. }) => ErrorKind::Cancelled,
            Self::Summarize(_) => ErrorKind::GenerationFailure,
            Self::Qa(QaError::Index(error)) => error.kind(),
            Self::Qa(QaError::Prompt(_)) => ErrorKind::InvalidConfiguration,
            Self::Qa(QaError::Generation(_)) => ErrorKind::GenerationFailure,
            Self::Results(error) => error.kind(),
        }
    }
}
