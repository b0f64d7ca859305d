//! HTTP surface for Rusty Reader.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /documents` – Load, chunk and index a document from a path on the server.
//! - `POST /summarize` – Load a document, summarize it (`map_reduce` or `refine`) and persist the
//!   result as `total_summary.json`.
//! - `POST /ask` – Load a document and answer a question from its most relevant chunks.
//! - `GET /summary` – Return the last persisted summary without recomputing it.
//! - `GET /metrics` – Observe load/summary/question counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Failures are answered with `{ "error": <kind>, "message": <text> }` and a status derived from
//! the error kind.

use crate::metrics::MetricsSnapshot;
use crate::processing::{
    Answer, AskRequest, CancellationFlag, ErrorKind, LoadOutcome, LoadRequest, ReaderApi,
    ReaderError, SummarizeRequest, SummaryResult,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the reader API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ReaderApi + 'static,
{
    Router::new()
        .route("/documents", post(load_document::<S>))
        .route("/summarize", post(summarize_document::<S>))
        .route("/ask", post(ask_document::<S>))
        .route("/summary", get(get_summary::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for `POST /summarize`.
#[derive(Deserialize)]
struct SummarizeBody {
    #[serde(flatten)]
    load: LoadRequest,
    #[serde(flatten)]
    summarize: SummarizeRequest,
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskBody {
    #[serde(flatten)]
    load: LoadRequest,
    #[serde(flatten)]
    ask: AskRequest,
}

async fn load_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<LoadRequest>,
) -> Result<Json<LoadOutcome>, AppError>
where
    S: ReaderApi,
{
    let outcome = service.load_document(request).await?;
    tracing::info!(
        source = %outcome.source,
        collection = %outcome.manifest.collection_name,
        chunks = outcome.chunk_count,
        "Load request completed"
    );
    Ok(Json(outcome))
}

/// Summarize a document and persist the result.
///
/// A client that disconnects drops this future; the summarization stops with it and the
/// previously persisted summary is left untouched.
async fn summarize_document<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<SummarizeBody>,
) -> Result<Json<SummaryResult>, AppError>
where
    S: ReaderApi,
{
    let result = service
        .summarize_document(body.load, body.summarize, CancellationFlag::new())
        .await?;
    tracing::info!(
        chunks = result.chunk_summaries.len(),
        "Summarize request completed"
    );
    Ok(Json(result))
}

async fn ask_document<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<AskBody>,
) -> Result<Json<Answer>, AppError>
where
    S: ReaderApi,
{
    let answer = service.ask_document(body.load, body.ask).await?;
    Ok(Json(answer))
}

async fn get_summary<S>(State(service): State<Arc<S>>) -> Result<Json<SummaryResult>, AppError>
where
    S: ReaderApi,
{
    Ok(Json(service.load_summary().await?))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: ReaderApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "load",
                method: "POST",
                path: "/documents",
                description: "Load a text document, split it into chunks and index their embeddings. `mode` is `rebuild` (default) or `reuse`.",
                request_example: Some(json!({
                    "path": "docs/proposal.md",
                    "collection": "optional-collection",
                    "mode": "rebuild"
                })),
            },
            CommandDescriptor {
                name: "summarize",
                method: "POST",
                path: "/summarize",
                description: "Summarize a document with `map_reduce` or `refine` and persist the result.",
                request_example: Some(json!({
                    "path": "docs/proposal.md",
                    "strategy": "refine",
                    "preset": "proposal_review",
                    "templates": { "refine_initial": "Summarize:\n{text}" }
                })),
            },
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Answer a question from the `k` chunks most similar to it.",
                request_example: Some(json!({
                    "path": "docs/proposal.md",
                    "question": "What is the budget?",
                    "k": 4
                })),
            },
            CommandDescriptor {
                name: "summary",
                method: "GET",
                path: "/summary",
                description: "Return the last persisted summary.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return load, summary and question counters.",
                request_example: None,
            },
        ],
    })
}

struct AppError(ReaderError);

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidConfiguration | ErrorKind::UnreadableDocument => StatusCode::BAD_REQUEST,
        ErrorKind::CorruptOrMissingArtifact => StatusCode::NOT_FOUND,
        ErrorKind::IndexMismatch => StatusCode::CONFLICT,
        ErrorKind::EmbeddingFailure | ErrorKind::GenerationFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %self.0, ?kind, "Request failed");
        } else {
            tracing::warn!(error = %self.0, ?kind, "Request rejected");
        }
        (
            status,
            Json(json!({ "error": kind, "message": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<ReaderError> for AppError {
    fn from(inner: ReaderError) -> Self {
        Self(inner)
    }
}
