//! Fixed-window character chunking.
//!
//! Chunk *i* covers characters `[i * step, i * step + chunk_size)` of the source text, clipped to
//! its length, where `step = chunk_size - chunk_overlap`. Boundaries ignore sentences and
//! paragraphs: the summarizers and retrieval tolerate arbitrary cut points, and a plain window
//! keeps the split deterministic and cheap.
//!
//! Sizes count Unicode scalar values, never bytes, so a chunk boundary can't land inside a
//! multi-byte character.

use super::types::{CharSpan, Chunk, ChunkingError};

/// Chunker parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingSettings {
    /// Characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0,
        }
    }
}

impl ChunkingSettings {
    /// Reject sizes the window arithmetic cannot honor.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                chunk_overlap: self.chunk_overlap,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// Split `text` into ordered, overlapping chunks.
///
/// Returns an empty vector for empty input. The last chunk may be shorter than `chunk_size`;
/// splitting stops as soon as a chunk reaches the end of the text, so no chunk is ever a pure
/// suffix of its predecessor.
pub fn split(text: &str, settings: ChunkingSettings) -> Result<Vec<Chunk>, ChunkingError> {
    settings.validate()?;
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let ChunkingSettings {
        chunk_size,
        chunk_overlap,
    } = settings;
    let step = chunk_size - chunk_overlap;

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut chunks = Vec::with_capacity(char_len.div_ceil(step));
    let mut start = 0usize;
    loop {
        let end = start.saturating_add(chunk_size).min(char_len);
        let (Some(&byte_start), Some(&byte_end)) = (boundaries.get(start), boundaries.get(end))
        else {
            break;
        };
        let Some(slice) = text.get(byte_start..byte_end) else {
            break;
        };
        chunks.push(Chunk {
            index: chunks.len(),
            text: slice.to_string(),
            char_span: CharSpan { start, end },
        });
        if end >= char_len {
            break;
        }
        start += step;
    }

    tracing::debug!(
        chars = char_len,
        chunk_size,
        chunk_overlap,
        chunks = chunks.len(),
        "Split document into chunks"
    );
    Ok(chunks)
}
