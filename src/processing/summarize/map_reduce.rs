use super::{CancellationFlag, SummarizeSettings, TokenCounter, build_token_counter, check_cancelled};
use crate::generation::{GenerationClient, generate_with_timeout};
use crate::processing::prompt::PromptTemplate;
use crate::processing::types::{Chunk, ChunkSummary, SummarizeError, SummaryResult};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{StreamExt, TryStreamExt, stream};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const SEPARATOR: &str = "\n";

/// Summarize every chunk independently, then combine the partial summaries.
///
/// Map calls run concurrently, at most `map_concurrency` at a time, and may complete in any
/// order; results are keyed by chunk index and re-associated with their chunk by that key. When
/// the joined partial summaries exceed `reduce_token_budget`, consecutive partials are grouped
/// within the budget and each group is collapsed with the combine template, for at most
/// `reduce_max_collapse_rounds` rounds, before the final combine.
pub struct MapReduceSummarizer {
    generator: Arc<dyn GenerationClient>,
    settings: SummarizeSettings,
    token_counter: TokenCounter,
}

impl MapReduceSummarizer {
    /// Build a summarizer whose reduce budget is measured with the `token_model` tokenizer.
    pub fn new(generator: Arc<dyn GenerationClient>, settings: SummarizeSettings) -> Self {
        let token_counter = build_token_counter(&settings.token_model);
        Self {
            generator,
            settings,
            token_counter,
        }
    }

    /// Replace the tokenizer used by the reduce budget.
    pub fn with_token_counter(mut self, token_counter: TokenCounter) -> Self {
        self.token_counter = token_counter;
        self
    }

    /// Run map then reduce over `chunks`.
    pub async fn summarize(
        &self,
        chunks: &[Chunk],
        map: &PromptTemplate,
        combine: &PromptTemplate,
        cancel: &CancellationFlag,
    ) -> Result<SummaryResult, SummarizeError> {
        map.check(&["text"])?;
        combine.check(&["text"])?;
        if chunks.is_empty() {
            return Ok(SummaryResult::default());
        }

        let mut partials = self.map_phase(chunks, map, cancel).await?;
        let chunk_summaries: Vec<ChunkSummary> = chunks
            .iter()
            .map(|chunk| ChunkSummary {
                chunk_index: chunk.index,
                chunk_content: chunk.text.clone(),
                chunk_summary: partials.remove(&chunk.index).unwrap_or_default(),
            })
            .collect();

        let ordered: Vec<String> = chunk_summaries
            .iter()
            .map(|entry| entry.chunk_summary.clone())
            .collect();
        let total_summary = self.reduce_phase(ordered, combine, cancel, chunks.len()).await?;

        Ok(SummaryResult {
            total_summary,
            chunk_summaries,
        })
    }

    async fn map_phase(
        &self,
        chunks: &[Chunk],
        map: &PromptTemplate,
        cancel: &CancellationFlag,
    ) -> Result<BTreeMap<usize, String>, SummarizeError> {
        let total = chunks.len();
        let completed = AtomicUsize::new(0);
        let limit = self.settings.map_concurrency.max(1);
        tracing::debug!(chunks = total, concurrency = limit, "Starting map phase");

        let calls: Vec<BoxFuture<'_, Result<(usize, String), SummarizeError>>> = chunks
            .iter()
            .map(|chunk| self.map_one(chunk, map, cancel, &completed, total).boxed())
            .collect();
        stream::iter(calls)
            .buffer_unordered(limit)
            .try_collect()
            .await
    }

    async fn map_one(
        &self,
        chunk: &Chunk,
        map: &PromptTemplate,
        cancel: &CancellationFlag,
        completed: &AtomicUsize,
        total: usize,
    ) -> Result<(usize, String), SummarizeError> {
        check_cancelled(cancel, completed.load(Ordering::SeqCst), total)?;
        let prompt = map.render(&[("text", chunk.text.as_str())])?;
        let summary = generate_with_timeout(self.generator.as_ref(), &self.settings.generation, prompt)
            .await
            .map_err(|source| {
                tracing::warn!(chunk_index = chunk.index, error = %source, "Map call failed");
                SummarizeError::ChunkGeneration {
                    chunk_index: chunk.index,
                    source,
                }
            })?;
        completed.fetch_add(1, Ordering::SeqCst);
        Ok((chunk.index, summary))
    }

    async fn reduce_phase(
        &self,
        partials: Vec<String>,
        combine: &PromptTemplate,
        cancel: &CancellationFlag,
        total: usize,
    ) -> Result<String, SummarizeError> {
        let budget = self.settings.reduce_token_budget;
        let mut current = partials;
        let mut round = 0;

        while round < self.settings.reduce_max_collapse_rounds
            && current.len() > 1
            && (self.token_counter)(&current.join(SEPARATOR)) > budget
        {
            check_cancelled(cancel, total, total)?;
            let groups = self.group_within_budget(&current, budget);
            let mut collapsed = Vec::with_capacity(groups.len());
            for group in groups {
                check_cancelled(cancel, total, total)?;
                collapsed.push(self.combine(combine, &group.join(SEPARATOR)).await?);
            }
            round += 1;
            tracing::debug!(
                round,
                before = current.len(),
                after = collapsed.len(),
                "Collapsed partial summaries"
            );
            current = collapsed;
        }

        check_cancelled(cancel, total, total)?;
        self.combine(combine, &current.join(SEPARATOR)).await
    }

    /// Split `partials` into consecutive groups whose joined text fits `budget`.
    ///
    /// A single partial that alone exceeds the budget still forms its own group.
    fn group_within_budget<'a>(&self, partials: &'a [String], budget: usize) -> Vec<Vec<&'a str>> {
        let mut groups: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for partial in partials {
            current.push(partial.as_str());
            if current.len() > 1 && (self.token_counter)(&current.join(SEPARATOR)) > budget {
                current.pop();
                groups.push(std::mem::take(&mut current));
                current.push(partial.as_str());
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    async fn combine(&self, combine: &PromptTemplate, text: &str) -> Result<String, SummarizeError> {
        let prompt = combine.render(&[("text", text)])?;
        generate_with_timeout(self.generator.as_ref(), &self.settings.generation, prompt)
            .await
            .map_err(|error| {
                tracing::warn!(error = %error, "Combine call failed");
                SummarizeError::Combine(error)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationClientError, GenerationRequest};
    use crate::processing::CharSpan;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            char_span: CharSpan {
                start: index * 10,
                end: index * 10 + text.chars().count(),
            },
        }
    }

    fn template(name: &str, text: &str) -> PromptTemplate {
        PromptTemplate::new(name, text)
    }

    /// Echoes `S:<prompt>` after an optional per-prompt delay and records completion order.
    #[derive(Default)]
    struct EchoGenerator {
        delays_ms: HashMap<String, u64>,
        fail_on: Option<String>,
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationClient for EchoGenerator {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<String, GenerationClientError> {
            if let Some(delay) = self.delays_ms.get(&request.prompt) {
                tokio::time::sleep(Duration::from_millis(*delay)).await;
            }
            if self.fail_on.as_deref() == Some(request.prompt.as_str()) {
                return Err(GenerationClientError::GenerationFailed("boom".into()));
            }
            self.completed
                .lock()
                .expect("lock")
                .push(request.prompt.clone());
            Ok(format!("S:{}", request.prompt))
        }
    }

    /// Replies with `<n>` where `n` is the number of lines in the prompt.
    #[derive(Default)]
    struct LineCounter {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationClient for LineCounter {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<String, GenerationClientError> {
            let lines = request.prompt.lines().count();
            self.prompts.lock().expect("lock").push(request.prompt);
            Ok(format!("<{lines}>"))
        }
    }

    fn char_counter() -> TokenCounter {
        Arc::new(|text: &str| text.chars().count())
    }

    #[tokio::test]
    async fn map_reduce_pairs_partials_and_combines_in_order() {
        let generator = Arc::new(EchoGenerator::default());
        let summarizer = MapReduceSummarizer::new(generator.clone(), SummarizeSettings::default())
            .with_token_counter(char_counter());
        let chunks = vec![chunk(0, "alpha"), chunk(1, "beta"), chunk(2, "gamma")];

        let result = summarizer
            .summarize(
                &chunks,
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &CancellationFlag::new(),
            )
            .await
            .expect("summary");

        assert_eq!(result.chunk_summaries[1].chunk_summary, "S:beta");
        assert_eq!(result.total_summary, "S:S:alpha\nS:beta\nS:gamma");
        assert_eq!(generator.completed.lock().expect("lock").len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn map_results_are_keyed_by_chunk_index_when_completing_out_of_order() {
        let generator = Arc::new(EchoGenerator {
            delays_ms: HashMap::from([
                ("c0".to_string(), 300),
                ("c1".to_string(), 200),
                ("c2".to_string(), 100),
                ("c3".to_string(), 0),
            ]),
            ..EchoGenerator::default()
        });
        let settings = SummarizeSettings {
            map_concurrency: 4,
            ..SummarizeSettings::default()
        };
        let summarizer =
            MapReduceSummarizer::new(generator.clone(), settings).with_token_counter(char_counter());
        let chunks: Vec<Chunk> = (0..4).map(|i| chunk(i, &format!("c{i}"))).collect();

        let result = summarizer
            .summarize(
                &chunks,
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &CancellationFlag::new(),
            )
            .await
            .expect("summary");

        let completed = generator.completed.lock().expect("lock").clone();
        assert_eq!(&completed[..4], ["c3", "c2", "c1", "c0"]);
        for (entry, chunk) in result.chunk_summaries.iter().zip(&chunks) {
            assert_eq!(entry.chunk_index, chunk.index);
            assert_eq!(entry.chunk_content, chunk.text);
            assert_eq!(entry.chunk_summary, format!("S:{}", chunk.text));
        }
        assert_eq!(result.total_summary, "S:S:c0\nS:c1\nS:c2\nS:c3");
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let generator = Arc::new(EchoGenerator::default());
        let summarizer = MapReduceSummarizer::new(generator.clone(), SummarizeSettings::default())
            .with_token_counter(char_counter());

        let result = summarizer
            .summarize(
                &[],
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &CancellationFlag::new(),
            )
            .await
            .expect("summary");

        assert_eq!(result, SummaryResult::default());
        assert!(generator.completed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn a_failed_map_call_aborts_the_run() {
        let generator = Arc::new(EchoGenerator {
            fail_on: Some("beta".into()),
            ..EchoGenerator::default()
        });
        let summarizer = MapReduceSummarizer::new(generator, SummarizeSettings::default())
            .with_token_counter(char_counter());
        let chunks = vec![chunk(0, "alpha"), chunk(1, "beta"), chunk(2, "gamma")];

        let error = summarizer
            .summarize(
                &chunks,
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &CancellationFlag::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, SummarizeError::ChunkGeneration { chunk_index: 1, .. }));
    }

    #[tokio::test]
    async fn templates_are_checked_before_any_call() {
        let generator = Arc::new(EchoGenerator::default());
        let summarizer = MapReduceSummarizer::new(generator.clone(), SummarizeSettings::default());

        let error = summarizer
            .summarize(
                &[chunk(0, "alpha")],
                &template("map", "{text}"),
                &template("combine", "{summaries}"),
                &CancellationFlag::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, SummarizeError::Prompt(_)));
        assert!(generator.completed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_generating() {
        let generator = Arc::new(EchoGenerator::default());
        let summarizer = MapReduceSummarizer::new(generator.clone(), SummarizeSettings::default())
            .with_token_counter(char_counter());
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let error = summarizer
            .summarize(
                &[chunk(0, "alpha"), chunk(1, "beta")],
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, SummarizeError::Cancelled { completed: 0, total: 2 }));
        assert!(generator.completed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn oversized_partials_are_collapsed_before_the_final_combine() {
        let generator = Arc::new(LineCounter::default());
        let settings = SummarizeSettings {
            reduce_token_budget: 8,
            reduce_max_collapse_rounds: 3,
            ..SummarizeSettings::default()
        };
        let summarizer =
            MapReduceSummarizer::new(generator.clone(), settings).with_token_counter(char_counter());
        let chunks: Vec<Chunk> = ["aaaa", "bbbb", "cccc", "dddd"]
            .iter()
            .enumerate()
            .map(|(i, text)| chunk(i, text))
            .collect();

        let result = summarizer
            .summarize(
                &chunks,
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &CancellationFlag::new(),
            )
            .await
            .expect("summary");

        let prompts = generator.prompts.lock().expect("lock").clone();
        assert_eq!(prompts.len(), 7);
        assert_eq!(&prompts[4..], ["<1>\n<1>", "<1>\n<1>", "<2>\n<2>"]);
        assert_eq!(result.total_summary, "<2>");
        assert!(result.chunk_summaries.iter().all(|entry| entry.chunk_summary == "<1>"));
    }

    #[tokio::test]
    async fn collapse_rounds_are_bounded() {
        let generator = Arc::new(EchoGenerator::default());
        let settings = SummarizeSettings {
            reduce_token_budget: 1,
            reduce_max_collapse_rounds: 1,
            ..SummarizeSettings::default()
        };
        let summarizer =
            MapReduceSummarizer::new(generator.clone(), settings).with_token_counter(char_counter());

        summarizer
            .summarize(
                &[chunk(0, "a"), chunk(1, "b")],
                &template("map", "{text}"),
                &template("combine", "{text}"),
                &CancellationFlag::new(),
            )
            .await
            .expect("summary");

        // two maps, one round collapsing each partial alone, one final combine
        assert_eq!(generator.completed.lock().expect("lock").len(), 5);
    }
}
