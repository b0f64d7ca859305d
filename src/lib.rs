#![deny(missing_docs)]

//! Core library for Rusty Reader: chunk long documents, index them for retrieval, and summarize
//! or answer questions about them with a language model.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Document loading.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text generation client abstraction and adapters.
pub mod generation;
/// Vector index over document chunks and its storage backends.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Reader counters.
pub mod metrics;
/// Chunking, summarization, question answering and result persistence.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
