//! Fixed-width sliding-window chunking over character offsets.
//!
//! A [`TextChunker`] cuts text into windows of `chunk_size` characters. Each
//! window starts `chunk_size - overlap` characters after the previous one, so
//! consecutive chunks share exactly `overlap` characters. The last window is
//! clipped to the end of the text and may be shorter.
//!
//! Offsets are measured in Unicode scalar values (`char`s), not bytes, so a
//! window never splits a multi-byte character.
//!
//! ```
//! use compass_context::text::TextChunker;
//!
//! let chunker = TextChunker::new(4, 1).unwrap();
//! let chunks: Vec<_> = chunker.chunks("abcdefghij").collect();
//!
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[0].content, "abcd");
//! assert_eq!(chunks[1].content, "defg");
//! assert_eq!(chunks[2].content, "ghij");
//! assert_eq!((chunks[2].start, chunks[2].end), (6, 10));
//! ```
//!
//! Iteration stops as soon as a window reaches the end of the text. A trailing
//! window that would lie entirely inside its predecessor is never produced, so
//! for a text of `L` characters the chunk count is `ceil((L - O) / (S - O))`
//! when `L > O`, exactly one when `0 < L <= O`, and zero for empty text.

use serde::Serialize;

/// Rejected chunker parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// One window of a chunked text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// The window's text.
    pub content: String,
    /// Zero-based emission index.
    pub position: usize,
    /// Character offset of the first character (inclusive).
    pub start: usize,
    /// Character offset one past the last character (exclusive).
    pub end: usize,
}

impl TextChunk {
    /// Number of characters in this chunk.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Validated sliding-window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    /// Create a chunker, rejecting a zero size or an overlap that would stall the window.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance in characters between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Compact identifier of the window geometry, e.g. `"512:50"`.
    ///
    /// Chunk positions and offsets only mean something relative to this value,
    /// so stores keep it next to the chunks they hold.
    pub fn profile(&self) -> String {
        format!("{}:{}", self.chunk_size, self.overlap)
    }

    /// Number of chunks [`chunks`](Self::chunks) yields for a text of `char_len` characters.
    pub fn expected_chunk_count(&self, char_len: usize) -> usize {
        if char_len == 0 {
            0
        } else if char_len <= self.overlap {
            1
        } else {
            (char_len - self.overlap).div_ceil(self.step())
        }
    }

    /// Lazily iterate over the windows of `text`.
    ///
    /// Every call starts a fresh iterator; nothing is carried over between calls.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        Chunks {
            text,
            boundaries,
            chunk_size: self.chunk_size,
            step: self.step(),
            next_start: 0,
            position: 0,
            done: text.is_empty(),
        }
    }
}

/// Iterator returned by [`TextChunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every character boundary, including `text.len()`.
    boundaries: Vec<usize>,
    chunk_size: usize,
    step: usize,
    next_start: usize,
    position: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let char_len = self.char_len();
        let start = self.next_start;
        let end = (start + self.chunk_size).min(char_len);

        let chunk = TextChunk {
            content: self.text[self.boundaries[start]..self.boundaries[end]].to_string(),
            position: self.position,
            start,
            end,
        };

        self.position += 1;
        if end >= char_len {
            self.done = true;
        } else {
            self.next_start = start + self.step;
        }

        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

/// Chunk `text` in one call.
///
/// Convenience wrapper around [`TextChunker::new`] and [`TextChunker::chunks`].
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<TextChunk>, ChunkError> {
    let chunker = TextChunker::new(chunk_size, overlap)?;
    Ok(chunker.chunks(text).collect())
}
