//! End-to-end runs of the reader service against deterministic stand-ins for the model services.

use async_trait::async_trait;
use rustyreader::config::{Config, EmbeddingProvider, GenerationProvider, VectorStoreKind};
use rustyreader::embedding::{
    EmbedderDescriptor, EmbeddingClient, EmbeddingClientError, HashingEmbeddingClient,
};
use rustyreader::generation::{GenerationClient, GenerationClientError, GenerationRequest};
use rustyreader::index::{IndexMode, LocalVectorStore, VectorStore};
use rustyreader::processing::{
    AskRequest, CancellationFlag, ErrorKind, LoadRequest, ReaderApi, ReaderService,
    SummarizeRequest, SummarizeStrategy, Summarizer, summarize::whitespace_token_counter,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn config(db_dir: &Path, chunk_size: usize) -> Config {
    Config {
        db_dir: db_dir.to_path_buf(),
        default_collection: "essay".into(),
        chunk_size,
        chunk_overlap: 0,
        embedding_provider: EmbeddingProvider::Hashing,
        embedding_model: "byte-hash".into(),
        embedding_dimension: 64,
        embedding_batch_size: 2,
        embedding_timeout_secs: 5,
        generation_provider: GenerationProvider::Ollama,
        generation_model: "stub".into(),
        generation_temperature: 0.0,
        generation_max_tokens: 128,
        generation_timeout_secs: 5,
        map_concurrency: 3,
        reduce_token_budget: 100_000,
        reduce_max_collapse_rounds: 3,
        retrieval_top_k: 2,
        vector_store: VectorStoreKind::Local,
        qdrant_url: None,
        qdrant_api_key: None,
        qdrant_timeout_secs: 5,
        ollama_url: "http://127.0.0.1:11434".into(),
        openai_base_url: "https://api.openai.com".into(),
        openai_api_key: None,
        prompt_template_dir: None,
        server_port: None,
    }
}

/// Replies `S:<prompt>` and counts calls.
#[derive(Default)]
struct Echo {
    calls: AtomicUsize,
}

#[async_trait]
impl GenerationClient for Echo {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("S:{}", request.prompt))
    }
}

struct Offline;

#[async_trait]
impl GenerationClient for Offline {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationClientError> {
        Err(GenerationClientError::ProviderUnavailable("connection refused".into()))
    }
}

/// Keeps the running summary once one exists.
struct Stubborn;

#[async_trait]
impl GenerationClient for Stubborn {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        Ok(match request.prompt.split_once('|') {
            Some((existing, _)) => existing.to_string(),
            None => "the proposal asks for funding".to_string(),
        })
    }
}

#[derive(Default)]
struct Recorder {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl GenerationClient for Recorder {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        self.prompts.lock().expect("lock").push(request.prompt);
        Ok("answer".into())
    }
}

/// One-hot vectors keyed on a word, so equal scores are exactly equal.
struct KeywordEmbedder {
    descriptor: EmbedderDescriptor,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            descriptor: EmbedderDescriptor {
                provider: "keyword".into(),
                model: "one-hot".into(),
                dimension: 3,
            },
        }
    }
}

#[async_trait]
impl EmbeddingClient for KeywordEmbedder {
    fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.contains("apple") {
                    vec![1.0, 0.0, 0.0]
                } else if text.contains("pear") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect())
    }
}

fn service_with(
    config: &Config,
    embedder: Arc<dyn EmbeddingClient>,
    generator: Arc<dyn GenerationClient>,
) -> ReaderService {
    let store: Arc<dyn VectorStore> =
        Arc::new(LocalVectorStore::new(config.db_dir.join("collections")));
    let summarizer = Summarizer::new(Arc::clone(&generator), config.summarize())
        .with_token_counter(whitespace_token_counter());
    ReaderService::new(config, embedder, generator, store)
        .expect("service")
        .with_summarizer(summarizer)
}

fn hashing(config: &Config) -> Arc<dyn EmbeddingClient> {
    Arc::new(HashingEmbeddingClient::new(config.embedding_dimension))
}

fn write_document(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("essay.txt");
    std::fs::write(&path, text).expect("write document");
    path
}

fn echo_templates() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("map".to_string(), "{text}".to_string()),
        ("combine".to_string(), "{text}".to_string()),
    ])
}

fn read_artifact(db_dir: &Path) -> String {
    std::fs::read_to_string(db_dir.join("summaries").join("total_summary.json"))
        .expect("artifact")
}

#[tokio::test]
async fn map_reduce_over_a_long_document_pairs_every_chunk_with_its_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir.path().join("db"), 1000);
    let text: String = (0..2500)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    let path = write_document(dir.path(), &text);
    let generator = Arc::new(Echo::default());
    let service = service_with(&config, hashing(&config), generator.clone());

    let loaded = service.load(LoadRequest::new(&path)).await.expect("load");
    let lengths: Vec<usize> = loaded
        .chunks
        .iter()
        .map(|chunk| chunk.text.chars().count())
        .collect();
    assert_eq!(lengths, vec![1000, 1000, 500]);

    let result = service
        .summarize(
            &loaded,
            &SummarizeRequest {
                templates: echo_templates(),
                ..SummarizeRequest::default()
            },
            &CancellationFlag::new(),
        )
        .await
        .expect("summary");

    let chunks = &loaded.chunks;
    assert_eq!(
        result.chunk_summaries[1].chunk_summary,
        format!("S:{}", chunks[1].text)
    );
    assert_eq!(
        result.total_summary,
        format!(
            "S:S:{}\nS:{}\nS:{}",
            chunks[0].text, chunks[1].text, chunks[2].text
        )
    );
    assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn empty_document_summarizes_to_nothing_without_generation_calls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir.path().join("db"), 1000);
    let path = write_document(dir.path(), "");
    let generator = Arc::new(Echo::default());
    let service = service_with(&config, hashing(&config), generator.clone());

    for strategy in [SummarizeStrategy::MapReduce, SummarizeStrategy::Refine] {
        let result = service
            .summarize_document(
                LoadRequest::new(&path),
                SummarizeRequest {
                    strategy,
                    ..SummarizeRequest::default()
                },
                CancellationFlag::new(),
            )
            .await
            .expect("summary");
        assert!(result.chunk_summaries.is_empty());
        assert_eq!(result.total_summary, "");
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    let reloaded = service.load_summary().await.expect("reloaded");
    assert!(reloaded.chunk_summaries.is_empty());
}

#[tokio::test]
async fn retrieval_returns_top_k_with_ties_broken_by_chunk_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir.path().join("db"), 5);
    let path = write_document(dir.path(), "applepear.appleotherapple");
    let generator = Arc::new(Recorder::default());
    let service = service_with(&config, Arc::new(KeywordEmbedder::new()), generator.clone());

    let loaded = service.load(LoadRequest::new(&path)).await.expect("load");
    assert_eq!(loaded.chunks.len(), 5);

    let request = AskRequest {
        question: "apple".into(),
        k: Some(2),
        templates: BTreeMap::from([(
            "query".to_string(),
            "{context}\nQ: {question}".to_string(),
        )]),
    };
    let first = service.ask(&loaded, &request).await.expect("answer");
    let second = service.ask(&loaded, &request).await.expect("answer");

    let indices: Vec<usize> = first.source_chunks.iter().map(|chunk| chunk.index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(first, second);
    let prompts = generator.prompts.lock().expect("lock").clone();
    assert_eq!(prompts[0], "apple\n\napple\nQ: apple");
}

#[tokio::test]
async fn refine_keeps_an_unchanged_summary_across_irrelevant_chunks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir.path().join("db"), 10);
    let path = write_document(dir.path(), "proposal: weather ok recipe: soup");
    let service = service_with(&config, hashing(&config), Arc::new(Stubborn));

    let result = service
        .summarize_document(
            LoadRequest::new(&path),
            SummarizeRequest {
                strategy: SummarizeStrategy::Refine,
                templates: BTreeMap::from([
                    ("refine_initial".to_string(), "{text}".to_string()),
                    ("refine".to_string(), "{existing_answer}|{text}".to_string()),
                ]),
                ..SummarizeRequest::default()
            },
            CancellationFlag::new(),
        )
        .await
        .expect("summary");

    assert_eq!(result.total_summary, "the proposal asks for funding");
    assert!(result.chunk_summaries.len() > 1);
    assert!(
        result
            .chunk_summaries
            .iter()
            .all(|entry| entry.chunk_summary == result.total_summary)
    );
}

#[tokio::test]
async fn failed_or_cancelled_runs_leave_the_previous_artifact_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_dir = dir.path().join("db");
    let config = config(&db_dir, 10);
    let path = write_document(dir.path(), "0123456789abcdefghij");

    let good = service_with(&config, hashing(&config), Arc::new(Echo::default()));
    let saved = good
        .summarize_document(
            LoadRequest::new(&path),
            SummarizeRequest {
                templates: echo_templates(),
                ..SummarizeRequest::default()
            },
            CancellationFlag::new(),
        )
        .await
        .expect("summary");
    let before = read_artifact(&db_dir);

    let offline = service_with(&config, hashing(&config), Arc::new(Offline));
    let error = offline
        .summarize_document(
            LoadRequest::new(&path),
            SummarizeRequest::default(),
            CancellationFlag::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::GenerationFailure);

    let cancel = CancellationFlag::new();
    cancel.cancel();
    let error = good
        .summarize_document(LoadRequest::new(&path), SummarizeRequest::default(), cancel)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    assert_eq!(read_artifact(&db_dir), before);
    assert_eq!(offline.load_summary().await.expect("reloaded"), saved);
}

#[tokio::test]
async fn reusing_a_collection_neither_duplicates_entries_nor_mixes_embedders() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_dir = dir.path().join("db");
    let config = config(&db_dir, 10);
    let path = write_document(dir.path(), "0123456789abcdefghijklmnopqrst");
    let service = service_with(&config, hashing(&config), Arc::new(Echo::default()));

    service.load(LoadRequest::new(&path)).await.expect("build");
    service.load(LoadRequest::new(&path)).await.expect("rebuild");
    let reused = service
        .load(LoadRequest {
            mode: IndexMode::Reuse,
            ..LoadRequest::new(&path)
        })
        .await
        .expect("reuse");

    assert_eq!(reused.index.manifest().entry_count, 3);
    let embedder = HashingEmbeddingClient::new(config.embedding_dimension);
    let hits = reused
        .index
        .query(&embedder, "abcdefghij", 10)
        .await
        .expect("query");
    let mut indices: Vec<usize> = hits.iter().map(|hit| hit.chunk.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);

    let mut narrower = config.clone();
    narrower.embedding_dimension = 32;
    let other = service_with(&narrower, hashing(&narrower), Arc::new(Echo::default()));
    let error = other
        .load(LoadRequest {
            mode: IndexMode::Reuse,
            ..LoadRequest::new(&path)
        })
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IndexMismatch);
}

#[tokio::test]
async fn invalid_chunking_is_rejected_before_any_work() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(&dir.path().join("db"), 10);
    config.chunk_overlap = 10;
    let generator: Arc<dyn GenerationClient> = Arc::new(Echo::default());
    let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::new(dir.path()));

    let error = ReaderService::new(&config, hashing(&config), generator, store)
        .err()
        .expect("invalid chunking");
    assert_eq!(error.kind(), ErrorKind::InvalidConfiguration);
}

/// Hashing embedder that pauses before every call, so overlapping requests interleave.
struct SlowEmbedder {
    inner: HashingEmbeddingClient,
}

#[async_trait]
impl EmbeddingClient for SlowEmbedder {
    fn descriptor(&self) -> &EmbedderDescriptor {
        self.inner.descriptor()
    }

    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        self.inner.generate_embeddings(texts).await
    }
}

#[tokio::test]
async fn concurrent_questions_on_one_collection_read_their_own_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir.path().join("db"), 10);
    let embedder = Arc::new(SlowEmbedder {
        inner: HashingEmbeddingClient::new(config.embedding_dimension),
    });
    let service = service_with(&config, embedder, Arc::new(Echo::default()));

    let first_text = "aaaaaaaaaabbbbbbbbbb";
    let second_text = "yyyyyyyyyyzzzzzzzzzz";
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    std::fs::write(&first, first_text).expect("write first");
    std::fs::write(&second, second_text).expect("write second");

    let ask = |path: PathBuf| {
        service.ask_document(
            LoadRequest::new(path),
            AskRequest {
                question: "aaaaaaaaaa".into(),
                k: Some(2),
                ..AskRequest::default()
            },
        )
    };
    let (first_answer, second_answer) = tokio::join!(ask(first), ask(second));

    let first_answer = first_answer.expect("first answer");
    let second_answer = second_answer.expect("second answer");
    assert_eq!(first_answer.source_chunks.len(), 2);
    assert_eq!(second_answer.source_chunks.len(), 2);
    assert!(first_answer.source_chunks.iter().all(|chunk| first_text.contains(&chunk.text)));
    assert!(second_answer.source_chunks.iter().all(|chunk| second_text.contains(&chunk.text)));
    assert_eq!(service.metrics_snapshot().documents_loaded, 2);
}
