//! Whole-document summarization strategies.
//!
//! [`MapReduceSummarizer`] scatters one generation call per chunk over a bounded pool and then
//! combines the partial summaries; [`RefineSummarizer`] folds the chunks sequentially into a
//! running summary. Both check their templates before the first generation call, honor a
//! [`CancellationFlag`] between chunk calls and abort on the first failed call.

mod map_reduce;
mod refine;

pub use map_reduce::MapReduceSummarizer;
pub use refine::RefineSummarizer;

use super::prompt::PromptTemplates;
use super::types::{Chunk, SummarizeError, SummaryResult};
use crate::generation::{GenerationClient, GenerationSettings};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

/// Counts tokens in a piece of text.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Which summarization algorithm to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizeStrategy {
    /// Independent summary per chunk, then combine.
    #[default]
    MapReduce,
    /// Sequential fold into a running summary.
    Refine,
}

impl FromStr for SummarizeStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "map_reduce" | "mapreduce" => Ok(Self::MapReduce),
            "refine" => Ok(Self::Refine),
            other => Err(format!("unknown summarization strategy '{other}'")),
        }
    }
}

/// Parameters for a summarize call.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeSettings {
    /// Applied to every generation call.
    pub generation: GenerationSettings,
    /// Maximum number of in-flight map calls.
    pub map_concurrency: usize,
    /// Token budget of a single combine prompt's `{text}`.
    pub reduce_token_budget: usize,
    /// Maximum number of collapse rounds before the final combine.
    pub reduce_max_collapse_rounds: usize,
    /// Model whose tokenizer measures the reduce budget.
    pub token_model: String,
}

impl Default for SummarizeSettings {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            map_concurrency: 4,
            reduce_token_budget: 3000,
            reduce_max_collapse_rounds: 3,
            token_model: String::new(),
        }
    }
}

/// Cooperative cancellation shared between a caller and a running summarization.
///
/// Checked between chunk calls; a call already in flight finishes or times out on its own.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// A flag that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this flag to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Both strategies behind one entry point.
pub struct Summarizer {
    map_reduce: MapReduceSummarizer,
    refine: RefineSummarizer,
}

impl Summarizer {
    /// Build both strategies around the same generator.
    pub fn new(generator: Arc<dyn GenerationClient>, settings: SummarizeSettings) -> Self {
        let refine = RefineSummarizer::new(Arc::clone(&generator), settings.generation);
        Self {
            map_reduce: MapReduceSummarizer::new(generator, settings),
            refine,
        }
    }

    /// Replace the tokenizer used by the reduce budget.
    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.map_reduce = self.map_reduce.with_token_counter(counter);
        self
    }

    /// Run `strategy` over `chunks` with the matching templates from `templates`.
    pub async fn run(
        &self,
        strategy: SummarizeStrategy,
        chunks: &[Chunk],
        templates: &PromptTemplates,
        cancel: &CancellationFlag,
    ) -> Result<SummaryResult, SummarizeError> {
        tracing::info!(?strategy, chunks = chunks.len(), "Summarizing document");
        match strategy {
            SummarizeStrategy::MapReduce => {
                self.map_reduce
                    .summarize(chunks, &templates.map, &templates.combine, cancel)
                    .await
            }
            SummarizeStrategy::Refine => {
                self.refine
                    .summarize(chunks, &templates.refine_initial, &templates.refine, cancel)
                    .await
            }
        }
    }
}

/// Token counter for `model`, falling back to `cl100k_base` and then to whitespace words.
pub fn build_token_counter(model: &str) -> TokenCounter {
    match resolve_encoding(model.trim()) {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(model, error = %error, "Tokenizer unavailable; falling back to whitespace counter");
            whitespace_token_counter()
        }
    }
}

fn resolve_encoding(model: &str) -> anyhow::Result<CoreBPE> {
    if model.is_empty() {
        return cl100k_base();
    }
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(error) => {
            tracing::debug!(model, error = %error, "No tokenizer for model; using 'cl100k_base'");
            cl100k_base()
        }
    }
}

/// Counts whitespace-separated words; any non-empty text counts as at least one token.
pub fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn check_cancelled(
    cancel: &CancellationFlag,
    completed: usize,
    total: usize,
) -> Result<(), SummarizeError> {
    if cancel.is_cancelled() {
        tracing::info!(completed, total, "Summarization cancelled");
        return Err(SummarizeError::Cancelled { completed, total });
    }
    Ok(())
}
