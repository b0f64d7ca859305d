use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing reader activity.
#[derive(Default)]
pub struct ReaderMetrics {
    documents_loaded: AtomicU64,
    chunks_indexed: AtomicU64,
    summaries_persisted: AtomicU64,
    questions_answered: AtomicU64,
}

impl ReaderMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a loaded document and the number of chunks newly embedded for it.
    pub fn record_document(&self, chunks_indexed: u64) {
        self.documents_loaded.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunks_indexed, Ordering::Relaxed);
    }

    /// Record a summary written to the result store.
    pub fn record_summary(&self) {
        self.summaries_persisted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_question(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_loaded: self.documents_loaded.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            summaries_persisted: self.summaries_persisted.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of reader counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents loaded since startup.
    pub documents_loaded: u64,
    /// Total chunks embedded across all loads (reused collections add nothing).
    pub chunks_indexed: u64,
    /// Number of summaries written to the result store.
    pub summaries_persisted: u64,
    /// Number of questions answered.
    pub questions_answered: u64,
}
