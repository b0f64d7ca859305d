use std::{env, sync::Once};

use rustyreader::{
    config::{self, Config},
    embedding::build_embedding_client,
    generation::{GenerationRequest, build_generation_client},
    index::{IndexMode, VectorIndex, build_vector_store},
    processing::{LoadRequest, ReaderService, split},
};

static INIT: Once = Once::new();

fn set_default_env(key: &str, value: &str) {
    let needs_value = env::var(key).map(|v| v.trim().is_empty()).unwrap_or(true);
    if needs_value {
        // SAFETY: Tests run serially via Once and we intentionally mutate process env.
        unsafe {
            env::set_var(key, value);
        }
    }
}

fn live_config() -> Config {
    INIT.call_once(|| {
        set_default_env("EMBEDDING_PROVIDER", "ollama");
        set_default_env("EMBEDDING_MODEL", "nomic-embed-text");
        set_default_env("EMBEDDING_DIMENSION", "768");
        set_default_env("GENERATION_PROVIDER", "ollama");
        set_default_env("OLLAMA_URL", "http://127.0.0.1:11434");
        set_default_env("QDRANT_URL", "http://127.0.0.1:6333");
    });
    config::load_config().expect("live configuration")
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    let config = live_config();
    let client = build_embedding_client(&config);
    let vectors = client
        .generate_embeddings(vec!["rusty-reader live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected embedding per input chunk");
    assert_eq!(
        vectors[0].len(),
        config.embedding_dimension,
        "embedding dimension mismatch"
    );
}

#[tokio::test]
#[ignore = "Requires live Ollama generation"]
async fn live_ollama_generation_replies() {
    let config = live_config();
    let client = build_generation_client(&config);
    let reply = client
        .generate(GenerationRequest {
            prompt: "Reply with the single word: ready".into(),
            temperature: 0.0,
            max_output_tokens: 16,
        })
        .await
        .expect("failed to request a completion from provider");
    assert!(!reply.trim().is_empty());
}

#[tokio::test]
#[ignore = "Requires live Qdrant and Ollama embeddings"]
async fn live_qdrant_index_roundtrip() {
    let mut config = live_config();
    config.vector_store = config::VectorStoreKind::Qdrant;
    let store = build_vector_store(&config).expect("qdrant store");
    let embedder = build_embedding_client(&config);
    let chunks = split(
        "Rust guarantees memory safety. Qdrant stores vectors. Ollama runs models locally.",
        config.chunking(),
    )
    .expect("chunks");

    let index = VectorIndex::load(
        store,
        embedder.as_ref(),
        "rusty-reader-live",
        &chunks,
        IndexMode::Rebuild,
        config.embedding_batch_size,
    )
    .await
    .expect("index");
    let hits = index
        .query(embedder.as_ref(), "Which store holds vectors?", 1)
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings and generation"]
async fn live_service_answers_from_a_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = live_config();
    config.db_dir = dir.path().join("db");
    config.vector_store = config::VectorStoreKind::Local;
    let path = dir.path().join("note.txt");
    std::fs::write(&path, "The meeting is on Tuesday at noon in room 4.").expect("write");

    let service = ReaderService::from_config(&config).expect("service");
    let loaded = service.load(LoadRequest::new(&path)).await.expect("load");
    let answer = service
        .ask(
            &loaded,
            &rustyreader::processing::AskRequest {
                question: "When is the meeting?".into(),
                k: Some(1),
                ..Default::default()
            },
        )
        .await
        .expect("answer");
    assert_eq!(answer.source_chunks.len(), 1);
}
