//! Persistence of the `total_summary.json` artifact.
//!
//! The file layout is an external contract: exactly `total_summary` plus an ordered
//! `chunk_summaries` array of `{chunk_content, chunk_summary}` objects, pretty-printed with a
//! four-space indent and non-ASCII text written verbatim. Writes go to a temporary sibling that
//! is renamed into place, so a failed save leaves the previous artifact intact.

use super::types::{ChunkSummary, ErrorKind, SummaryResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the persisted summary artifact.
pub const SUMMARY_FILE_NAME: &str = "total_summary.json";

/// Errors raised while saving or loading the summary artifact.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    /// No artifact has been persisted at the location yet.
    #[error("no persisted summary at {}", path.display())]
    Missing {
        /// Expected artifact path.
        path: PathBuf,
    },
    /// The artifact exists but is not a valid summary document.
    #[error("persisted summary at {} is malformed: {source}", path.display())]
    Corrupt {
        /// Artifact path.
        path: PathBuf,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },
    /// The artifact could not be read or written.
    #[error("failed to access persisted summary at {}: {source}", path.display())]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The summary could not be encoded.
    #[error("failed to encode summary: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ResultStoreError {
    /// Caller-facing classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Missing { .. } | Self::Corrupt { .. } => ErrorKind::CorruptOrMissingArtifact,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::InvalidData => {
                ErrorKind::CorruptOrMissingArtifact
            }
            Self::Io { .. } | Self::Encode(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredSummary {
    total_summary: String,
    chunk_summaries: Vec<StoredChunkSummary>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredChunkSummary {
    chunk_content: String,
    chunk_summary: String,
}

/// Reads and writes `total_summary.json` inside a directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the artifact.
    pub fn path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE_NAME)
    }

    /// Persist `result`, replacing any earlier artifact atomically.
    pub async fn save(&self, result: &SummaryResult) -> Result<PathBuf, ResultStoreError> {
        let path = self.path();
        let stored = StoredSummary {
            total_summary: result.total_summary.clone(),
            chunk_summaries: result
                .chunk_summaries
                .iter()
                .map(|entry| StoredChunkSummary {
                    chunk_content: entry.chunk_content.clone(),
                    chunk_summary: entry.chunk_summary.clone(),
                })
                .collect(),
        };
        let bytes = encode_pretty(&stored).map_err(ResultStoreError::Encode)?;

        write_atomically(&self.dir, &path, &bytes)
            .await
            .map_err(|source| ResultStoreError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!(
            path = %path.display(),
            chunks = result.chunk_summaries.len(),
            "Persisted summary"
        );
        Ok(path)
    }

    /// Reload the last persisted artifact.
    pub async fn load(&self) -> Result<SummaryResult, ResultStoreError> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResultStoreError::Missing { path });
            }
            Err(source) => return Err(ResultStoreError::Io { path, source }),
        };

        let stored: StoredSummary = serde_json::from_slice(&bytes)
            .map_err(|source| ResultStoreError::Corrupt { path: path.clone(), source })?;

        tracing::debug!(path = %path.display(), chunks = stored.chunk_summaries.len(), "Loaded persisted summary");
        Ok(SummaryResult {
            total_summary: stored.total_summary,
            chunk_summaries: stored
                .chunk_summaries
                .into_iter()
                .enumerate()
                .map(|(chunk_index, entry)| ChunkSummary {
                    chunk_index,
                    chunk_content: entry.chunk_content,
                    chunk_summary: entry.chunk_summary,
                })
                .collect(),
        })
    }
}

pub(crate) fn encode_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    value.serialize(&mut serializer)?;
    Ok(bytes)
}

/// Write `bytes` to a uniquely named sibling of `path`, then rename it over `path`.
pub(crate) async fn write_atomically(
    dir: &Path,
    path: &Path,
    bytes: &[u8],
) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(dir).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(error) = tokio::fs::write(&staging, bytes).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(error);
    }
    if let Err(error) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(error);
    }
    Ok(())
}
