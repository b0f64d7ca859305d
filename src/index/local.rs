//! JSON-file vector store: `<root>/<collection>/index.json` holds the manifest and every entry.

use super::{
    CollectionManifest, IndexError, ScoredChunk, VectorIndexEntry, VectorStore, cosine_similarity,
    rank_order,
};
use crate::processing::results::write_atomically;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const INDEX_FILE: &str = "index.json";

#[derive(Serialize, Deserialize)]
struct StoredCollection {
    manifest: CollectionManifest,
    entries: Vec<VectorIndexEntry>,
}

/// Brute-force cosine search over collections persisted as JSON files.
#[derive(Debug, Clone)]
pub struct LocalVectorStore {
    root: PathBuf,
}

impl LocalVectorStore {
    /// Store keeping one directory per collection under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn index_path(&self, collection: &str) -> PathBuf {
        self.root.join(collection).join(INDEX_FILE)
    }

    async fn read(&self, collection: &str) -> Result<Option<StoredCollection>, IndexError> {
        let path = self.index_path(collection);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IndexError::Storage { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| IndexError::Corrupt { path, source })
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn manifest(&self, collection: &str) -> Result<Option<CollectionManifest>, IndexError> {
        Ok(self.read(collection).await?.map(|stored| stored.manifest))
    }

    async fn replace(
        &self,
        manifest: &CollectionManifest,
        entries: Vec<VectorIndexEntry>,
    ) -> Result<(), IndexError> {
        let dir = self.root.join(&manifest.collection_name);
        let path = dir.join(INDEX_FILE);
        let stored = StoredCollection {
            manifest: manifest.clone(),
            entries,
        };
        let bytes = serde_json::to_vec(&stored).map_err(|source| IndexError::Corrupt {
            path: path.clone(),
            source,
        })?;
        write_atomically(&dir, &path, &bytes)
            .await
            .map_err(|source| IndexError::Storage { path, source })
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let stored = self
            .read(collection)
            .await?
            .ok_or_else(|| IndexError::MissingCollection(collection.to_string()))?;

        let mut scored: Vec<ScoredChunk> = stored
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk(),
                score: cosine_similarity(&entry.vector, vector),
            })
            .collect();
        scored.sort_by(|a, b| rank_order((a.score, a.chunk.index), (b.score, b.chunk.index)));
        scored.truncate(k);
        Ok(scored)
    }
}
