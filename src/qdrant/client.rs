//! HTTP client wrapper for interacting with Qdrant.

use crate::index::{
    CollectionManifest, IndexError, ScoredChunk, VectorIndexEntry, VectorStore,
    current_timestamp_rfc3339, rank_order,
};
use crate::qdrant::{
    payload::{
        MANIFEST_POINT_ID, build_chunk_payload, build_manifest_payload, chunk_filter,
        chunk_point_id, manifest_vector, parse_chunk, parse_manifest,
    },
    types::{PointResponse, QdrantError, QueryResponse, QueryResponseResult},
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

const UPSERT_BATCH: usize = 256;

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client for the Qdrant instance at `url`; every request is bounded by `timeout`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("rusty-reader/0.1")
            .timeout(timeout)
            .build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            timeout_ms = timeout.as_millis() as u64,
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Drop a collection; missing collections are not an error.
    pub async fn delete_collection(&self, collection_name: &str) -> Result<(), QdrantError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{collection_name}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection deleted");
        })
        .await
    }

    /// Create a collection with the specified vector size.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, vector_size, "Collection created");
        })
        .await
    }

    /// Upload points to the given collection, waiting until they are searchable.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<Value>,
    ) -> Result<(), QdrantError> {
        if points.is_empty() {
            return Ok(());
        }

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points indexed"
            );
        })
        .await
    }

    /// Fetch the payload of point `id`; `None` when the collection or point is missing.
    pub async fn point_payload(
        &self,
        collection_name: &str,
        id: u64,
    ) -> Result<Option<serde_json::Map<String, Value>>, QdrantError> {
        let response = self
            .request(
                Method::GET,
                &format!("collections/{collection_name}/points/{id}"),
            )
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: PointResponse = response.json().await?;
                Ok(body.result.and_then(|record| record.payload))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Point lookup failed");
                Err(error)
            }
        }
    }

    /// Perform a similarity search restricted to chunk points.
    pub async fn search_chunks(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
            "filter": chunk_filter(),
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        points
            .into_iter()
            .map(|point| {
                let payload = point.payload.unwrap_or_default();
                Ok(ScoredChunk {
                    chunk: parse_chunk(&payload)?,
                    score: point.score,
                })
            })
            .collect()
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantService {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn manifest(&self, collection: &str) -> Result<Option<CollectionManifest>, IndexError> {
        let Some(payload) = self.point_payload(collection, MANIFEST_POINT_ID).await? else {
            return Ok(None);
        };
        Ok(Some(parse_manifest(&payload)?))
    }

    async fn replace(
        &self,
        manifest: &CollectionManifest,
        entries: Vec<VectorIndexEntry>,
    ) -> Result<(), IndexError> {
        let collection = manifest.collection_name.as_str();
        let dimension = manifest.embedder.dimension;
        self.delete_collection(collection).await?;
        self.create_collection(collection, dimension as u64).await?;

        let indexed_at = current_timestamp_rfc3339();
        let points: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "id": chunk_point_id(entry.chunk_index),
                    "vector": entry.vector,
                    "payload": build_chunk_payload(entry, &indexed_at),
                })
            })
            .collect();
        for batch in points.chunks(UPSERT_BATCH) {
            self.upsert_points(collection, batch.to_vec()).await?;
        }

        // The manifest marks the collection complete, so it goes in only after every chunk.
        let manifest_point = json!({
            "id": MANIFEST_POINT_ID,
            "vector": manifest_vector(dimension),
            "payload": build_manifest_payload(manifest),
        });
        self.upsert_points(collection, vec![manifest_point]).await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // Qdrant breaks score ties arbitrarily. Fetch past the k-th hit and keep widening the page
        // while its last hit still ties the k-th, so the lowest tied indices are never cut off.
        let mut limit = k + 1;
        loop {
            let mut hits = self.search_chunks(collection, vector, limit).await?;
            let tied_at_cutoff =
                hits.len() == limit && hits[limit - 1].score == hits[k - 1].score;
            if tied_at_cutoff {
                tracing::debug!(collection, limit, "Score tie at the cutoff; fetching more");
                limit *= 2;
                continue;
            }
            hits.sort_by(|a, b| rank_order((a.score, a.chunk.index), (b.score, b.chunk.index)));
            hits.truncate(k);
            return Ok(hits);
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
