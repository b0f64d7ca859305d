//! Vector index: embeds chunks into a named, persistent collection and answers
//! nearest-neighbour queries against it.
//!
//! Storage sits behind [`VectorStore`], with a JSON-file backend ([`LocalVectorStore`]) and a
//! Qdrant backend ([`crate::qdrant::QdrantService`]). Every collection carries a
//! [`CollectionManifest`] naming the embedder that produced its vectors; opening or querying it
//! through any other embedder is an [`IndexError::Mismatch`].

mod local;
mod similarity;

pub use local::LocalVectorStore;
pub use similarity::{cosine_similarity, rank_order};

use crate::config::{Config, VectorStoreKind};
use crate::embedding::{EmbedderDescriptor, EmbeddingClient, EmbeddingClientError, check_embeddings};
use crate::processing::{CharSpan, Chunk, ErrorKind};
use crate::qdrant::{QdrantError, QdrantService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised while building, opening or querying a collection.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Collection names become directory names and must stay within `[A-Za-z0-9._-]`.
    #[error("invalid collection name '{0}'")]
    InvalidCollectionName(String),
    /// The embedding provider failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The collection was built by a different embedder.
    #[error("collection '{collection}' was built with {expected}, not {actual}")]
    Mismatch {
        /// Collection name.
        collection: String,
        /// Embedder recorded in the manifest.
        expected: EmbedderDescriptor,
        /// Embedder used for this call.
        actual: EmbedderDescriptor,
    },
    /// The collection does not exist.
    #[error("collection '{0}' does not exist")]
    MissingCollection(String),
    /// Collection files could not be read or written.
    #[error("failed to access collection files at {}: {source}", path.display())]
    Storage {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Collection files exist but cannot be decoded.
    #[error("collection file {} is malformed: {source}", path.display())]
    Corrupt {
        /// Offending path.
        path: PathBuf,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },
    /// The Qdrant backend failed.
    #[error("qdrant failure: {0}")]
    Qdrant(#[from] QdrantError),
}

impl IndexError {
    /// Caller-facing classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCollectionName(_) => ErrorKind::InvalidConfiguration,
            Self::Embedding(_) => ErrorKind::EmbeddingFailure,
            Self::Mismatch { .. } => ErrorKind::IndexMismatch,
            Self::MissingCollection(_) | Self::Corrupt { .. } => {
                ErrorKind::CorruptOrMissingArtifact
            }
            Self::Storage { .. } | Self::Qdrant(_) => ErrorKind::Storage,
        }
    }
}

/// How `load` treats an existing collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Embed every chunk and overwrite the collection.
    #[default]
    Rebuild,
    /// Open the collection as is; build it only when it does not exist yet.
    Reuse,
}

/// Whether a [`VectorIndex`] handle embedded its chunks or opened a stored collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    /// Chunks were embedded and the collection overwritten.
    Built,
    /// An existing collection was opened as is.
    Reused,
}

/// Metadata recorded alongside every collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    /// Collection name.
    pub collection_name: String,
    /// Embedder that produced the stored vectors.
    pub embedder: EmbedderDescriptor,
    /// Number of stored entries.
    pub entry_count: usize,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

/// One stored chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexEntry {
    /// Index of the chunk the vector was computed from.
    pub chunk_index: usize,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Chunk text.
    pub chunk_text: String,
    /// Character span of the chunk in its document.
    pub char_span: CharSpan,
    /// Owning collection.
    pub collection_name: String,
}

impl VectorIndexEntry {
    /// Rebuild the chunk this entry was derived from.
    pub fn chunk(&self) -> Chunk {
        Chunk {
            index: self.chunk_index,
            text: self.chunk_text.clone(),
            char_span: self.char_span,
        }
    }
}

/// Retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Storage backend for collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend label for logs.
    fn backend(&self) -> &'static str;

    /// Manifest of `collection`, or `None` when it does not exist.
    async fn manifest(&self, collection: &str) -> Result<Option<CollectionManifest>, IndexError>;

    /// Replace the whole collection with `entries`.
    async fn replace(
        &self,
        manifest: &CollectionManifest,
        entries: Vec<VectorIndexEntry>,
    ) -> Result<(), IndexError>;

    /// The `k` entries most similar to `vector`, in retrieval order.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError>;
}

/// Reject names that are empty, hidden, or contain anything outside `[A-Za-z0-9._-]`.
pub fn validate_collection_name(name: &str) -> Result<(), IndexError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidCollectionName(name.to_string()))
    }
}

/// Current timestamp formatted for manifests and payloads.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Handle on a built or opened collection.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    manifest: CollectionManifest,
    source: IndexSource,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("backend", &self.store.backend())
            .field("manifest", &self.manifest)
            .field("source", &self.source)
            .finish()
    }
}

impl VectorIndex {
    /// Embed every chunk (in batches of `batch_size`) and overwrite `collection` with the result.
    pub async fn build(
        store: Arc<dyn VectorStore>,
        embedder: &dyn EmbeddingClient,
        collection: &str,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        validate_collection_name(collection)?;
        let descriptor = embedder.descriptor().clone();

        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = embedder.generate_embeddings(texts).await?;
            check_embeddings(&descriptor, batch.len(), &vectors)?;
            entries.extend(batch.iter().zip(vectors).map(|(chunk, vector)| VectorIndexEntry {
                chunk_index: chunk.index,
                vector,
                chunk_text: chunk.text.clone(),
                char_span: chunk.char_span,
                collection_name: collection.to_string(),
            }));
        }

        let manifest = CollectionManifest {
            collection_name: collection.to_string(),
            embedder: descriptor,
            entry_count: entries.len(),
            created_at: current_timestamp_rfc3339(),
        };
        store.replace(&manifest, entries).await?;

        tracing::info!(
            collection,
            backend = store.backend(),
            entries = manifest.entry_count,
            embedder = %manifest.embedder,
            "Built vector index"
        );
        Ok(Self {
            store,
            manifest,
            source: IndexSource::Built,
        })
    }

    /// Open an existing collection without re-embedding. `None` when it does not exist.
    pub async fn open(
        store: Arc<dyn VectorStore>,
        embedder: &dyn EmbeddingClient,
        collection: &str,
    ) -> Result<Option<Self>, IndexError> {
        validate_collection_name(collection)?;
        let Some(manifest) = store.manifest(collection).await? else {
            return Ok(None);
        };
        ensure_same_embedder(&manifest, embedder.descriptor())?;
        tracing::info!(
            collection,
            backend = store.backend(),
            entries = manifest.entry_count,
            "Opened existing vector index"
        );
        Ok(Some(Self {
            store,
            manifest,
            source: IndexSource::Reused,
        }))
    }

    /// Build or reuse `collection` according to `mode`.
    pub async fn load(
        store: Arc<dyn VectorStore>,
        embedder: &dyn EmbeddingClient,
        collection: &str,
        chunks: &[Chunk],
        mode: IndexMode,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        if mode == IndexMode::Reuse {
            if let Some(index) = Self::open(Arc::clone(&store), embedder, collection).await? {
                return Ok(index);
            }
            tracing::debug!(collection, "Collection missing; building it");
        }
        Self::build(store, embedder, collection, chunks, batch_size).await
    }

    /// Manifest of the underlying collection.
    pub fn manifest(&self) -> &CollectionManifest {
        &self.manifest
    }

    /// Whether this handle embedded its chunks or reused a stored collection.
    pub fn source(&self) -> IndexSource {
        self.source
    }

    /// The `k` chunks most similar to `question`, highest score first, ties by ascending index.
    pub async fn query(
        &self,
        embedder: &dyn EmbeddingClient,
        question: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        ensure_same_embedder(&self.manifest, embedder.descriptor())?;
        if k == 0 || self.manifest.entry_count == 0 {
            return Ok(Vec::new());
        }

        let vectors = embedder.generate_embeddings(vec![question.to_string()]).await?;
        check_embeddings(embedder.descriptor(), 1, &vectors)?;
        let Some(vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let mut hits = self
            .store
            .search(&self.manifest.collection_name, &vector, k)
            .await?;
        hits.sort_by(|a, b| rank_order((a.score, a.chunk.index), (b.score, b.chunk.index)));
        hits.truncate(k);

        tracing::debug!(
            collection = %self.manifest.collection_name,
            k,
            hits = hits.len(),
            "Queried vector index"
        );
        Ok(hits)
    }
}

fn ensure_same_embedder(
    manifest: &CollectionManifest,
    descriptor: &EmbedderDescriptor,
) -> Result<(), IndexError> {
    if &manifest.embedder == descriptor {
        return Ok(());
    }
    Err(IndexError::Mismatch {
        collection: manifest.collection_name.clone(),
        expected: manifest.embedder.clone(),
        actual: descriptor.clone(),
    })
}

/// Build the vector store selected by configuration.
pub fn build_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>, IndexError> {
    match config.vector_store {
        VectorStoreKind::Local => Ok(Arc::new(LocalVectorStore::new(
            config.db_dir.join("collections"),
        ))),
        VectorStoreKind::Qdrant => {
            let url = config.qdrant_url.as_deref().unwrap_or_default();
            let service = QdrantService::new(
                url,
                config.qdrant_api_key.clone(),
                config.qdrant_timeout(),
            )?;
            Ok(Arc::new(service))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingClient;
    use crate::processing::chunking::{ChunkingSettings, split};

    fn chunks(text: &str, size: usize) -> Vec<Chunk> {
        split(
            text,
            ChunkingSettings {
                chunk_size: size,
                chunk_overlap: 0,
            },
        )
        .expect("chunks")
    }

    fn store(dir: &tempfile::TempDir) -> Arc<dyn VectorStore> {
        Arc::new(LocalVectorStore::new(dir.path()))
    }

    #[test]
    fn collection_names_are_validated() {
        assert!(validate_collection_name("essay-2024_v1.2").is_ok());
        for bad in ["", ".hidden", "../escape", "with space", "slash/name"] {
            assert!(
                matches!(
                    validate_collection_name(bad),
                    Err(IndexError::InvalidCollectionName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn build_and_query_returns_ranked_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = HashingEmbeddingClient::new(32);
        let chunks = chunks("Q~~~~~Q~~~~~Q~~~~~Q~~~~~Q", 5);

        let index = VectorIndex::build(store(&dir), &embedder, "letters", &chunks, 2)
            .await
            .expect("index");
        assert_eq!(index.manifest().entry_count, 5);
        assert_eq!(index.manifest().embedder, *embedder.descriptor());

        let hits = index.query(&embedder, "~~Q~~", 2).await.expect("hits");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "~~Q~~");
        assert_eq!(hits[0].chunk.index, 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn zero_k_and_empty_index_return_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = HashingEmbeddingClient::new(8);

        let empty = VectorIndex::build(store(&dir), &embedder, "empty", &[], 4)
            .await
            .expect("index");
        assert!(empty.query(&embedder, "anything", 3).await.expect("hits").is_empty());

        let full = VectorIndex::build(store(&dir), &embedder, "full", &chunks("abcdef", 2), 4)
            .await
            .expect("index");
        assert!(full.query(&embedder, "ab", 0).await.expect("hits").is_empty());
    }

    #[tokio::test]
    async fn reuse_opens_existing_collection_without_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = HashingEmbeddingClient::new(16);
        let chunks = chunks("one two three four", 5);

        let built = VectorIndex::load(store(&dir), &embedder, "doc", &chunks, IndexMode::Reuse, 8)
            .await
            .expect("built");
        let reused = VectorIndex::load(store(&dir), &embedder, "doc", &chunks, IndexMode::Reuse, 8)
            .await
            .expect("reused");

        assert_eq!(built.manifest(), reused.manifest());
        assert_eq!(reused.manifest().entry_count, chunks.len());
        assert_eq!(built.source(), IndexSource::Built);
        assert_eq!(reused.source(), IndexSource::Reused);
    }

    #[tokio::test]
    async fn opening_with_another_embedder_is_a_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chunks = chunks("some text to index", 6);
        VectorIndex::build(store(&dir), &HashingEmbeddingClient::new(16), "doc", &chunks, 8)
            .await
            .expect("built");

        let error = VectorIndex::open(store(&dir), &HashingEmbeddingClient::new(8), "doc")
            .await
            .unwrap_err();
        assert!(matches!(error, IndexError::Mismatch { .. }));
        assert_eq!(error.kind(), ErrorKind::IndexMismatch);
    }

    #[tokio::test]
    async fn open_reports_missing_collection_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opened = VectorIndex::open(store(&dir), &HashingEmbeddingClient::new(8), "nothing")
            .await
            .expect("open");
        assert!(opened.is_none());
    }
}
