//! Reader service coordinating loading, chunking, indexing, summarization and QA.

use crate::{
    config::Config,
    document::{Document, DocumentLoader, FileLoader},
    embedding::{EmbeddingClient, build_embedding_client},
    generation::{GenerationClient, build_generation_client},
    index::{
        CollectionManifest, IndexMode, IndexSource, VectorIndex, VectorStore,
        build_vector_store,
    },
    metrics::{MetricsSnapshot, ReaderMetrics},
    processing::{
        chunking::{ChunkingSettings, split},
        prompt::PromptTemplates,
        qa::RetrievalQa,
        results::ResultStore,
        summarize::{CancellationFlag, SummarizeStrategy, Summarizer},
        types::{Answer, Chunk, ReaderError, SummaryResult},
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Built-in template sets a request can start from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePreset {
    /// Configured templates.
    #[default]
    Default,
    /// Configured templates with the refine pair replaced by the proposal-review format.
    ProposalReview,
}

/// Which document to load and how to index it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoadRequest {
    /// Path of the document.
    pub path: PathBuf,
    /// Target collection; defaults to the configured one.
    #[serde(default)]
    pub collection: Option<String>,
    /// Rebuild the collection or reuse it when present.
    #[serde(default)]
    pub mode: IndexMode,
}

impl LoadRequest {
    /// Load `path` into the default collection, rebuilding it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            collection: None,
            mode: IndexMode::Rebuild,
        }
    }
}

/// Options of a summarize call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SummarizeRequest {
    /// Map-reduce or refine.
    #[serde(default)]
    pub strategy: SummarizeStrategy,
    /// Template set to start from.
    #[serde(default)]
    pub preset: TemplatePreset,
    /// Per-template overrides keyed by template name.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

/// Options of a question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AskRequest {
    /// The question.
    pub question: String,
    /// Chunks to retrieve; defaults to the configured `k`.
    #[serde(default)]
    pub k: Option<usize>,
    /// Per-template overrides keyed by template name.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

/// A loaded, chunked and indexed document.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Source document.
    pub document: Document,
    /// Chunks in document order.
    pub chunks: Vec<Chunk>,
    /// Index holding the chunk vectors.
    pub index: VectorIndex,
}

impl LoadedDocument {
    /// Serializable description of what was loaded.
    pub fn outcome(&self) -> LoadOutcome {
        LoadOutcome {
            source: self.document.source().to_string(),
            char_count: self.document.char_len(),
            chunk_count: self.chunks.len(),
            index_source: self.index.source(),
            manifest: self.index.manifest().clone(),
        }
    }
}

/// Description of a load, returned by the front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadOutcome {
    /// Document source identifier.
    pub source: String,
    /// Characters in the document.
    pub char_count: usize,
    /// Chunks produced.
    pub chunk_count: usize,
    /// Whether the chunks were embedded or an existing collection was reused.
    pub index_source: IndexSource,
    /// Manifest of the collection the chunks live in.
    pub manifest: CollectionManifest,
}

/// Path-level operations used by the HTTP and CLI front ends.
///
/// Every call loads its document itself, so front ends hold no state between requests.
#[async_trait]
pub trait ReaderApi: Send + Sync {
    /// Load, chunk and index a document.
    async fn load_document(&self, request: LoadRequest) -> Result<LoadOutcome, ReaderError>;

    /// Load a document, summarize it and persist the result.
    async fn summarize_document(
        &self,
        load: LoadRequest,
        request: SummarizeRequest,
        cancel: CancellationFlag,
    ) -> Result<SummaryResult, ReaderError>;

    /// Load a document and answer a question about it.
    async fn ask_document(
        &self,
        load: LoadRequest,
        request: AskRequest,
    ) -> Result<Answer, ReaderError>;

    /// Reload the last persisted summary.
    async fn load_summary(&self) -> Result<SummaryResult, ReaderError>;

    /// Current counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns the long-lived collaborators and the immutable settings derived from [`Config`].
///
/// Construct it once near process start and share it through an `Arc`. Loads into the same
/// collection are serialized, and `ask_document` keeps its collection locked until the answer
/// is generated, so concurrent requests never read each other's chunks.
pub struct ReaderService {
    chunking: ChunkingSettings,
    embedding_batch_size: usize,
    default_collection: String,
    default_top_k: usize,
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    summarizer: Summarizer,
    qa: RetrievalQa,
    templates: PromptTemplates,
    results: ResultStore,
    metrics: Arc<ReaderMetrics>,
    collection_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ReaderService {
    /// Build a service from configuration, constructing the configured providers.
    pub fn from_config(config: &Config) -> Result<Self, ReaderError> {
        tracing::info!(
            embedding = ?config.embedding_provider,
            generation = ?config.generation_provider,
            store = ?config.vector_store,
            "Initializing reader service"
        );
        let embedder = build_embedding_client(config);
        let generator = build_generation_client(config);
        let store = build_vector_store(config)?;
        Self::new(config, embedder, generator, store)
    }

    /// Build a service around injected collaborators.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingClient>,
        generator: Arc<dyn GenerationClient>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, ReaderError> {
        let chunking = config.chunking();
        chunking.validate()?;

        let templates = match &config.prompt_template_dir {
            Some(dir) => PromptTemplates::default().load_overrides(dir)?,
            None => PromptTemplates::default(),
        };

        Ok(Self {
            chunking,
            embedding_batch_size: config.embedding_batch_size,
            default_collection: config.default_collection.clone(),
            default_top_k: config.retrieval_top_k,
            loader: Arc::new(FileLoader),
            embedder,
            store,
            summarizer: Summarizer::new(Arc::clone(&generator), config.summarize()),
            qa: RetrievalQa::new(generator, config.generation()),
            templates,
            results: ResultStore::new(config.db_dir.join("summaries")),
            metrics: Arc::new(ReaderMetrics::new()),
            collection_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the document loader.
    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Replace the summarizer, e.g. to inject a different token counter.
    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Load, chunk and index the document named by `request`.
    ///
    /// The returned handle queries whatever the collection holds at query time; use
    /// [`ReaderApi::ask_document`] to load and ask without another load interleaving.
    pub async fn load(&self, request: LoadRequest) -> Result<LoadedDocument, ReaderError> {
        let collection = self.collection_for(&request);
        let _guard = self.lock_collection(&collection).await;
        self.load_locked(&collection, request).await
    }

    async fn load_locked(
        &self,
        collection: &str,
        request: LoadRequest,
    ) -> Result<LoadedDocument, ReaderError> {
        tracing::info!(path = %request.path.display(), collection, mode = ?request.mode, "Loading document");

        let document = self.loader.load(&request.path).await?;
        let chunks = split(document.text(), self.chunking)?;
        let index = VectorIndex::load(
            Arc::clone(&self.store),
            self.embedder.as_ref(),
            collection,
            &chunks,
            request.mode,
            self.embedding_batch_size,
        )
        .await?;

        let embedded = match index.source() {
            IndexSource::Built => chunks.len() as u64,
            IndexSource::Reused => 0,
        };
        self.metrics.record_document(embedded);
        Ok(LoadedDocument {
            document,
            chunks,
            index,
        })
    }

    fn collection_for(&self, request: &LoadRequest) -> String {
        request
            .collection
            .clone()
            .unwrap_or_else(|| self.default_collection.clone())
    }

    /// Wait for exclusive use of `collection`.
    async fn lock_collection(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .collection_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(collection.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Summarize a loaded document and persist the result.
    ///
    /// The artifact is written only after the whole summarization succeeded.
    pub async fn summarize(
        &self,
        loaded: &LoadedDocument,
        request: &SummarizeRequest,
        cancel: &CancellationFlag,
    ) -> Result<SummaryResult, ReaderError> {
        let templates = self.templates_for(request.preset, &request.templates)?;
        let result = self
            .summarizer
            .run(request.strategy, &loaded.chunks, &templates, cancel)
            .await?;
        self.results.save(&result).await?;
        self.metrics.record_summary();
        Ok(result)
    }

    /// Answer a question from a loaded document's index.
    pub async fn ask(
        &self,
        loaded: &LoadedDocument,
        request: &AskRequest,
    ) -> Result<Answer, ReaderError> {
        let templates = self.templates_for(TemplatePreset::Default, &request.templates)?;
        let k = request.k.unwrap_or(self.default_top_k);
        let answer = self
            .qa
            .answer(
                &request.question,
                &loaded.index,
                self.embedder.as_ref(),
                k,
                &templates.query,
            )
            .await?;
        self.metrics.record_question();
        Ok(answer)
    }

    /// Reload the last persisted summary without recomputing it.
    pub async fn load_summary(&self) -> Result<SummaryResult, ReaderError> {
        Ok(self.results.load().await?)
    }

    /// Current counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn templates_for(
        &self,
        preset: TemplatePreset,
        overrides: &BTreeMap<String, String>,
    ) -> Result<PromptTemplates, ReaderError> {
        let base = match preset {
            TemplatePreset::Default => self.templates.clone(),
            TemplatePreset::ProposalReview => {
                let proposal = PromptTemplates::proposal_review();
                PromptTemplates {
                    refine_initial: proposal.refine_initial,
                    refine: proposal.refine,
                    ..self.templates.clone()
                }
            }
        };
        Ok(base.with_overrides(overrides)?)
    }
}

#[async_trait]
impl ReaderApi for ReaderService {
    async fn load_document(&self, request: LoadRequest) -> Result<LoadOutcome, ReaderError> {
        Ok(self.load(request).await?.outcome())
    }

    async fn summarize_document(
        &self,
        load: LoadRequest,
        request: SummarizeRequest,
        cancel: CancellationFlag,
    ) -> Result<SummaryResult, ReaderError> {
        let loaded = self.load(load).await?;
        self.summarize(&loaded, &request, &cancel).await
    }

    async fn ask_document(
        &self,
        load: LoadRequest,
        request: AskRequest,
    ) -> Result<Answer, ReaderError> {
        let collection = self.collection_for(&load);
        let _guard = self.lock_collection(&collection).await;
        let loaded = self.load_locked(&collection, load).await?;
        self.ask(&loaded, &request).await
    }

    async fn load_summary(&self) -> Result<SummaryResult, ReaderError> {
        ReaderService::load_summary(self).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        ReaderService::metrics_snapshot(self)
    }
}
