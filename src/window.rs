//! Sentence-aligned window chunking with overlap padding.
//!
//! Splits a document into analyzer-sized windows whose logical ranges tile the
//! document exactly, then pads each window with context from its neighbours.
//!
//! ## How It Works
//!
//! ```text
//! max = 30, overlap = 5
//!
//! "The first sentence ends here. The second one is a bit longer."
//!                               ^ tentative cut at 30
//!                              ^ ". " found scanning back, cut moves to 29
//!
//!            logical                          span      padding (before/after)
//! Chunk 0: "The first sentence ends here."   [0..29]   -       / " The "
//! Chunk 1: " The second one is a bit longe"  [29..59]  "here." / "r."
//! Chunk 2: "r."                              [59..61]  "longe" / -
//! ```
//!
//! Each step measures `max_chunk_size` bytes from the current start. Before
//! cutting, the last `lookback` bytes of the window are searched backwards for
//! a sentence terminator (`.`, `!`, `?` followed by a space or newline, or a
//! full-width `。！？`). If one is found the cut moves to just after it, so no
//! clause is split across two analyzer calls. Otherwise the cut is forced at
//! the window edge.
//!
//! ## Why Overlap?
//!
//! The analyzer sees each window in isolation. A term sitting right at a
//! forced cut would be torn in half without padding:
//!
//! ```text
//! "... the torque converter housing ..."
//!              ↓ forced cut
//! No overlap:   ["... the torque conv", "erter housing ..."]  <- lost!
//! With overlap: ["... the torque converter hou", "que converter housing ..."]
//! ```
//!
//! The merge step later discards terms found in a window's leading padding,
//! since the previous window's trailing padding already saw them.

use crate::chunk::{ceil_char_boundary, floor_char_boundary};
use crate::{Chunker, Error, Result, TextChunk};

/// Default bytes searched backwards for a sentence terminator.
pub const DEFAULT_SENTENCE_LOOKBACK: usize = 500;

/// Sentence-aligned chunker with overlap padding.
///
/// ## Example
///
/// ```rust
/// use lexiq_pipeline::{Chunker, WindowChunker};
///
/// let chunker = WindowChunker::new(30, 5);
/// let text = "The first sentence ends here. The second one is a bit longer.";
/// let chunks = chunker.chunk(text);
///
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(chunks[0].logical_text(), "The first sentence ends here.");
/// assert_eq!(chunks[1].start_position, chunks[0].end_position);
/// assert_eq!(chunks[1].overlap_start, 5);
/// ```
#[derive(Debug, Clone)]
pub struct WindowChunker {
    max_chunk_size: usize,
    overlap_size: usize,
    lookback: usize,
}

impl WindowChunker {
    /// Create a new window chunker.
    ///
    /// # Arguments
    ///
    /// * `max_chunk_size` - Maximum logical window size in bytes
    /// * `overlap_size` - Bytes of neighbouring text padded onto each side
    ///
    /// # Panics
    ///
    /// Panics if `max_chunk_size == 0`.
    #[must_use]
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Self {
        assert!(max_chunk_size > 0, "max_chunk_size must be > 0");
        Self {
            max_chunk_size,
            overlap_size,
            lookback: DEFAULT_SENTENCE_LOOKBACK,
        }
    }

    /// Fallible constructor for configuration-driven setups.
    pub fn try_new(max_chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(Error::InvalidConfig("max_chunk_size must be > 0".to_string()));
        }
        if overlap_size >= max_chunk_size {
            return Err(Error::InvalidConfig(format!(
                "overlap_size {overlap_size} must be smaller than max_chunk_size {max_chunk_size}"
            )));
        }
        Ok(Self::new(max_chunk_size, overlap_size))
    }

    /// Set how far back from a tentative cut to look for a terminator.
    #[must_use]
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Maximum logical window size in bytes.
    #[must_use]
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Overlap padding in bytes.
    #[must_use]
    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Logical end offsets of every window, in order.
    fn cut_points(&self, text: &str) -> Vec<usize> {
        let mut cuts = Vec::with_capacity(self.estimate_chunks(text.len()));
        let mut start: usize = 0;

        while start < text.len() {
            let mut tentative = floor_char_boundary(text, start + self.max_chunk_size);
            if tentative <= start {
                // Window narrower than one char; take the whole char.
                tentative = ceil_char_boundary(text, start + 1);
            }

            let end = if tentative >= text.len() {
                text.len()
            } else {
                self.sentence_cut(text, start, tentative).unwrap_or(tentative)
            };

            cuts.push(end);
            start = end;
        }

        cuts
    }

    /// Nearest cut just after a sentence terminator in `(start, tentative]`.
    fn sentence_cut(&self, text: &str, start: usize, tentative: usize) -> Option<usize> {
        let floor = ceil_char_boundary(text, tentative.saturating_sub(self.lookback).max(start));

        text[floor..tentative]
            .char_indices()
            .rev()
            .find_map(|(offset, c)| {
                let after = floor + offset + c.len_utf8();
                let terminates = match c {
                    '.' | '!' | '?' => matches!(text[after..].chars().next(), Some(' ' | '\n')),
                    '。' | '！' | '？' => true,
                    _ => false,
                };
                (terminates && after > start).then_some(after)
            })
    }
}

impl Default for WindowChunker {
    fn default() -> Self {
        Self::new(4000, 150)
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.len() <= self.max_chunk_size {
            return vec![TextChunk::whole(text)];
        }

        let cuts = self.cut_points(text);
        let total = cuts.len();
        let mut chunks = Vec::with_capacity(total);
        let mut start: usize = 0;

        for (index, &end) in cuts.iter().enumerate() {
            let overlap_start = if index == 0 {
                0
            } else {
                start - ceil_char_boundary(text, start.saturating_sub(self.overlap_size))
            };
            let overlap_end = if index + 1 == total {
                0
            } else {
                floor_char_boundary(text, end + self.overlap_size) - end
            };

            chunks.push(TextChunk::new(
                text,
                start,
                end,
                overlap_start,
                overlap_end,
                index,
                total,
            ));
            start = end;
        }

        chunks
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        text_len.div_ceil(self.max_chunk_size).max(1)
    }
}
