use super::{CancellationFlag, check_cancelled};
use crate::generation::{GenerationClient, GenerationSettings, generate_with_timeout};
use crate::processing::prompt::PromptTemplate;
use crate::processing::types::{Chunk, ChunkSummary, SummarizeError, SummaryResult};
use std::sync::Arc;

/// Fold chunks one at a time into a running summary.
///
/// Chunk 0 goes through the initial template; every later chunk is rendered together with the
/// running summary through the refine template. Whatever the generator returns becomes the new
/// running summary.
pub struct RefineSummarizer {
    generator: Arc<dyn GenerationClient>,
    settings: GenerationSettings,
}

impl RefineSummarizer {
    /// Build a summarizer issuing calls with `settings`.
    pub fn new(generator: Arc<dyn GenerationClient>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Run the fold over `chunks`.
    pub async fn summarize(
        &self,
        chunks: &[Chunk],
        initial: &PromptTemplate,
        refine: &PromptTemplate,
        cancel: &CancellationFlag,
    ) -> Result<SummaryResult, SummarizeError> {
        initial.check(&["text"])?;
        refine.check(&["existing_answer", "text"])?;

        let total = chunks.len();
        let mut running = String::new();
        let mut chunk_summaries = Vec::with_capacity(total);

        for (position, chunk) in chunks.iter().enumerate() {
            check_cancelled(cancel, position, total)?;
            let prompt = if position == 0 {
                initial.render(&[("text", chunk.text.as_str())])?
            } else {
                refine.render(&[
                    ("existing_answer", running.as_str()),
                    ("text", chunk.text.as_str()),
                ])?
            };

            running = generate_with_timeout(self.generator.as_ref(), &self.settings, prompt)
                .await
                .map_err(|source| {
                    tracing::warn!(chunk_index = chunk.index, error = %source, "Refine call failed");
                    SummarizeError::ChunkGeneration {
                        chunk_index: chunk.index,
                        source,
                    }
                })?;
            tracing::debug!(chunk_index = chunk.index, total, "Refined running summary");

            chunk_summaries.push(ChunkSummary {
                chunk_index: chunk.index,
                chunk_content: chunk.text.clone(),
                chunk_summary: running.clone(),
            });
        }

        Ok(SummaryResult {
            total_summary: running,
            chunk_summaries,
        })
    }
}
