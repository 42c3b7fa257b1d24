//! The TextChunk type: an analyzer-sized window with overlap metadata.

use std::ops::Range;

/// A window of a document, sized for a single analyzer call.
///
/// ## Logical vs. Physical Extent
///
/// Each chunk owns a *logical* range `[start_position, end_position)` of the
/// original document. Logical ranges of consecutive chunks are contiguous and
/// never overlap. The *physical* `content` additionally carries up to
/// `overlap_start` bytes from before the logical start and `overlap_end` bytes
/// from after the logical end, so that terms straddling a cut are seen whole:
///
/// ```text
/// Document: "... end of one sentence. Start of the next ..."
///                                    |cut
/// Chunk 0 content: [   logical 0   ][overlap_end]
/// Chunk 1 content:         [overlap_start][   logical 1   ]
/// ```
///
/// Offsets are bytes, matching Rust's string slicing:
///
/// ```rust
/// use lexiq_pipeline::TextChunk;
///
/// let doc = "Hello there. General Kenobi.";
/// let chunk = TextChunk::new(doc, 13, 28, 7, 0, 1, 2);
///
/// assert_eq!(chunk.content, "there. General Kenobi.");
/// assert_eq!(chunk.logical_text(), "General Kenobi.");
/// assert_eq!(chunk.to_global(7), Some(13));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Text sent to the analyzer, including overlap padding.
    pub content: String,
    /// Zero-based index of this chunk in the sequence.
    pub chunk_index: usize,
    /// Number of chunks the document was split into.
    pub total_chunks: usize,
    /// Byte offset where the logical range starts in the original document.
    pub start_position: usize,
    /// Byte offset where the logical range ends (exclusive).
    pub end_position: usize,
    /// Bytes of padding prepended to `content` before `start_position`.
    pub overlap_start: usize,
    /// Bytes of padding appended to `content` after `end_position`.
    pub overlap_end: usize,
}

impl TextChunk {
    /// Build a chunk by slicing `document`.
    ///
    /// # Panics
    ///
    /// Panics if the padded range is out of bounds or not on char boundaries.
    #[must_use]
    pub fn new(
        document: &str,
        start_position: usize,
        end_position: usize,
        overlap_start: usize,
        overlap_end: usize,
        chunk_index: usize,
        total_chunks: usize,
    ) -> Self {
        let content = document[start_position - overlap_start..end_position + overlap_end].to_string();
        Self {
            content,
            chunk_index,
            total_chunks,
            start_position,
            end_position,
            overlap_start,
            overlap_end,
        }
    }

    /// A single chunk spanning the whole document with no padding.
    #[must_use]
    pub fn whole(document: &str) -> Self {
        Self::new(document, 0, document.len(), 0, 0, 0, 1)
    }

    /// The logical byte span of this chunk in the original document.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.start_position..self.end_position
    }

    /// The byte span covered by `content`, padding included.
    #[must_use]
    pub fn padded_span(&self) -> Range<usize> {
        self.start_position - self.overlap_start..self.end_position + self.overlap_end
    }

    /// The logical (unpadded) part of `content`.
    #[must_use]
    pub fn logical_text(&self) -> &str {
        &self.content[self.overlap_start..self.content.len() - self.overlap_end]
    }

    /// Length of the logical range in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end_position - self.start_position
    }

    /// Whether the logical range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start_position == self.end_position
    }

    /// Whether this is the first chunk of its document.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }

    /// Whether a chunk-local offset falls inside the leading overlap.
    #[must_use]
    pub fn in_start_overlap(&self, local: usize) -> bool {
        local < self.overlap_start
    }

    /// Map a chunk-local offset into document coordinates.
    ///
    /// Returns `None` if the offset points before the start of the document.
    #[must_use]
    pub fn to_global(&self, local: usize) -> Option<usize> {
        (self.start_position + local).checked_sub(self.overlap_start)
    }
}

impl std::fmt::Display for TextChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TextChunk {{ index: {}/{}, span: {}..{}, overlap: -{}/+{} }}",
            self.chunk_index + 1,
            self.total_chunks,
            self.start_position,
            self.end_position,
            self.overlap_start,
            self.overlap_end
        )
    }
}

/// Largest char boundary `<= index`, clamped to the text length.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Smallest char boundary `>= index`, clamped to the text length.
pub(crate) fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
