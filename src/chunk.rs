//! Sliding-window text chunker.
//!
//! Splits a document's combined text into fixed-size, overlapping windows —
//! the unit at which embeddings are computed and stored. Windows are measured
//! in characters, never raw bytes, so multi-byte text cannot be split inside
//! a code point.
//!
//! The window advances by `chunk_size - overlap` each step, so configurations
//! with `overlap >= chunk_size` would never make progress. Those are rejected
//! up front by [`ChunkingParams::validate`]; `chunk_text` itself assumes a
//! validated configuration.

use crate::error::EngineError;

/// Chunk size and overlap for one sync pass, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Reject configurations the chunker cannot make progress with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_size == 0 {
            return Err(EngineError::InvalidChunking(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(EngineError::InvalidChunking(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split text into overlapping windows of `chunk_size` characters.
///
/// Texts no longer than `chunk_size` come back as a single chunk. Otherwise
/// the window starts at 0 and advances by `chunk_size - overlap` until its
/// start passes the end of the text. Slices are raw — no trimming.
pub fn chunk_text(text: &str, params: ChunkingParams) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= params.chunk_size {
        return vec![text.to_string()];
    }

    let step = params.chunk_size - params.overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + params.chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(chunk_size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams::new(chunk_size, overlap)
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("hello world", params(500, 50));
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn exact_size_single_chunk() {
        let text = "a".repeat(10);
        let chunks = chunk_text(&text, params(10, 2));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn windows_advance_by_step() {
        let text = "abcdefghij"; // 10 chars
        let chunks = chunk_text(text, params(4, 1));
        // starts at 0, 3, 6, 9
        assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
    }

    #[test]
    fn coverage_has_no_gaps() {
        // Adjacent chunks overlap by exactly `overlap` characters, so
        // dropping the first `overlap` chars of each subsequent chunk
        // reconstructs the original text.
        let text: String = ('a'..='z').cycle().take(137).collect();
        let p = params(30, 7);
        let chunks = chunk_text(&text, p);

        let mut rebuilt = chunks[0].clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.chars().skip(p.overlap));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn zero_overlap_partitions_text() {
        let text = "0123456789";
        let chunks = chunk_text(text, params(3, 0));
        assert_eq!(chunks, vec!["012", "345", "678", "9"]);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "héllo wörld çafé über naïve"; // multi-byte chars throughout
        let chunks = chunk_text(text, params(5, 2));
        assert!(chunks.len() > 1);
        // Every chunk is exactly the window width in chars (except the tail).
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.chars().count(), 5);
        }
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        assert!(params(50, 50).validate().is_err());
        assert!(params(50, 60).validate().is_err());
        assert!(params(0, 0).validate().is_err());
        assert!(params(50, 49).validate().is_ok());
    }
}
