//! Document processing pipeline: chunking, summarization, retrieval QA and result persistence.

pub mod chunking;
pub mod prompt;
mod qa;
pub mod results;
mod service;
pub mod summarize;
pub mod types;

pub use chunking::{ChunkingSettings, split};
pub use prompt::{PromptError, PromptTemplate, PromptTemplates};
pub use qa::RetrievalQa;
pub use results::{ResultStore, ResultStoreError};
pub use service::{
    AskRequest, LoadOutcome, LoadRequest, LoadedDocument, ReaderApi, ReaderService,
    SummarizeRequest, TemplatePreset,
};
pub use summarize::{CancellationFlag, SummarizeSettings, SummarizeStrategy, Summarizer};
pub use types::{
    Answer, CharSpan, Chunk, ChunkSummary, ChunkingError, ErrorKind, QaError, ReaderError,
    SummarizeError, SummaryResult,
};
