//! Retrieval-augmented question answering.

use super::prompt::PromptTemplate;
use super::types::{Answer, QaError};
use crate::embedding::EmbeddingClient;
use crate::generation::{GenerationClient, GenerationSettings, generate_with_timeout};
use crate::index::VectorIndex;
use std::sync::Arc;

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Answers questions from the `k` chunks most relevant to them.
pub struct RetrievalQa {
    generator: Arc<dyn GenerationClient>,
    settings: GenerationSettings,
}

impl RetrievalQa {
    /// Build a QA flow issuing one generation call per question with `settings`.
    pub fn new(generator: Arc<dyn GenerationClient>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Retrieve, render the query template, generate.
    ///
    /// `k = 0` or an empty index still produces a generation call, with an empty context.
    pub async fn answer(
        &self,
        question: &str,
        index: &VectorIndex,
        embedder: &dyn EmbeddingClient,
        k: usize,
        template: &PromptTemplate,
    ) -> Result<Answer, QaError> {
        template.check(&["context", "question"])?;

        let hits = index.query(embedder, question, k).await?;
        let source_chunks: Vec<_> = hits.into_iter().map(|hit| hit.chunk).collect();
        let context = source_chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        let prompt = template.render(&[("context", context.as_str()), ("question", question)])?;
        let text = generate_with_timeout(self.generator.as_ref(), &self.settings, prompt).await?;

        tracing::info!(
            collection = %index.manifest().collection_name,
            k,
            sources = source_chunks.len(),
            "Answered question"
        );
        Ok(Answer {
            text,
            source_chunks,
        })
    }
}
