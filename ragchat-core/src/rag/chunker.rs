//! Fixed-window text chunking with overlap.
//!
//! Windows are measured in characters (Unicode scalar values), so multi-byte
//! text is never split inside a character and lengths match what users see.

use crate::config::RagConfig;

/// Splits text into overlapping windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Creates a chunker. `overlap` is clamped below `chunk_size` so the
    /// window always advances.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Splits `text` into windows of `chunk_size` characters, each starting
    /// `chunk_size - overlap` characters after the previous one.
    ///
    /// Text no longer than one window yields exactly one chunk; empty text
    /// yields none. The windows cover the input without gaps and the last
    /// `overlap` characters of a chunk open the next one.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return vec![];
        }

        // Byte offset of every char, plus the end of the string.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = offsets.len() - 1;

        if char_len <= self.chunk_size {
            return vec![text.to_string()];
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.chunk_size).min(char_len);
            chunks.push(text[offsets[start]..offsets[end]].to_string());

            if end == char_len {
                break;
            }
            start += step;
        }

        chunks
    }
}
