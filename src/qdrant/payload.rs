//! Helpers for constructing and decoding Qdrant payloads.
//!
//! A collection holds one manifest point (id `0`) plus one point per chunk (id
//! `chunk_index + 1`). The `record_type` field tells them apart so searches can filter the
//! manifest out.

use super::types::QdrantError;
use crate::embedding::EmbedderDescriptor;
use crate::index::{CollectionManifest, VectorIndexEntry};
use crate::processing::{CharSpan, Chunk};
use serde_json::{Map, Value, json};

/// Point id reserved for the collection manifest.
pub(crate) const MANIFEST_POINT_ID: u64 = 0;

const RECORD_MANIFEST: &str = "manifest";
const RECORD_CHUNK: &str = "chunk";

/// Point id stored for a chunk.
pub(crate) fn chunk_point_id(chunk_index: usize) -> u64 {
    chunk_index as u64 + 1
}

/// Filter matching chunk points only.
pub(crate) fn chunk_filter() -> Value {
    json!({
        "must": [
            { "key": "record_type", "match": { "value": RECORD_CHUNK } }
        ]
    })
}

/// Payload stored alongside each chunk vector.
pub(crate) fn build_chunk_payload(entry: &VectorIndexEntry, indexed_at: &str) -> Value {
    json!({
        "record_type": RECORD_CHUNK,
        "collection_name": entry.collection_name,
        "chunk_index": entry.chunk_index,
        "chunk_text": entry.chunk_text,
        "char_start": entry.char_span.start,
        "char_end": entry.char_span.end,
        "indexed_at": indexed_at,
    })
}

/// Payload of the manifest point.
pub(crate) fn build_manifest_payload(manifest: &CollectionManifest) -> Value {
    json!({
        "record_type": RECORD_MANIFEST,
        "collection_name": manifest.collection_name,
        "embedding_provider": manifest.embedder.provider,
        "embedding_model": manifest.embedder.model,
        "embedding_dimension": manifest.embedder.dimension,
        "entry_count": manifest.entry_count,
        "created_at": manifest.created_at,
    })
}

/// Unit vector stored with the manifest point; Qdrant rejects all-zero vectors under cosine.
pub(crate) fn manifest_vector(dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension.max(1)];
    vector[0] = 1.0;
    vector
}

/// Decode a manifest payload.
pub(crate) fn parse_manifest(payload: &Map<String, Value>) -> Result<CollectionManifest, QdrantError> {
    if payload.get("record_type").and_then(Value::as_str) != Some(RECORD_MANIFEST) {
        return Err(QdrantError::InvalidPayload(
            "point 0 is not a collection manifest".into(),
        ));
    }
    Ok(CollectionManifest {
        collection_name: string_field(payload, "collection_name")?,
        embedder: EmbedderDescriptor {
            provider: string_field(payload, "embedding_provider")?,
            model: string_field(payload, "embedding_model")?,
            dimension: usize_field(payload, "embedding_dimension")?,
        },
        entry_count: usize_field(payload, "entry_count")?,
        created_at: string_field(payload, "created_at")?,
    })
}

/// Decode a chunk payload.
pub(crate) fn parse_chunk(payload: &Map<String, Value>) -> Result<Chunk, QdrantError> {
    Ok(Chunk {
        index: usize_field(payload, "chunk_index")?,
        text: string_field(payload, "chunk_text")?,
        char_span: CharSpan {
            start: usize_field(payload, "char_start")?,
            end: usize_field(payload, "char_end")?,
        },
    })
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Result<String, QdrantError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| QdrantError::InvalidPayload(format!("missing string field '{key}'")))
}

fn usize_field(payload: &Map<String, Value>, key: &str) -> Result<usize, QdrantError> {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| QdrantError::InvalidPayload(format!("missing integer field '{key}'")))
}
