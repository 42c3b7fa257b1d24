//! Paragraph and sentence level change detection between document versions.
//!
//! ## Granularity
//!
//! ```text
//! old: [para 0][para 1][para 2]
//! new: [para 0][para 1'][para 2][para 3]
//!               ^modified        ^added
//! ```
//!
//! Paragraphs are blank-line delimited and compared pairwise by index. A
//! modified paragraph is split further into sentences (UAX #29) and only the
//! sentences absent from the old paragraph become changed segments, so a
//! one-word fix invalidates one sentence, not a whole paragraph.
//!
//! Segments for added and modified text use new-document offsets. Removed
//! paragraphs no longer exist in the new document; their segments keep the
//! offsets they had in the old one.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::{ceil_char_boundary, floor_char_boundary};
use crate::term::AnalyzedTerm;

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n\s*").expect("static pattern"));

/// What happened to a changed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// A paragraph with no counterpart in the old version.
    Added,
    /// A sentence that differs from the old paragraph at the same index.
    Modified,
    /// A paragraph that only the old version has (old-document offsets).
    Removed,
}

/// One changed region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangedSegment {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// The changed text.
    pub content: String,
    /// Kind of change.
    #[serde(rename = "type")]
    pub kind: SegmentKind,
}

impl ChangedSegment {
    /// Byte range of the segment.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Whether `position` lies inside the segment.
    #[must_use]
    pub fn contains(&self, position: usize) -> bool {
        self.span().contains(&position)
    }

    /// Whether the segment lies in the new document.
    #[must_use]
    pub fn in_new_document(&self) -> bool {
        self.kind != SegmentKind::Removed
    }
}

/// Delta between two versions of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChange {
    /// Paragraphs only in the new version.
    pub added: Vec<String>,
    /// Paragraphs only in the old version.
    pub removed: Vec<String>,
    /// New text of paragraphs that differ at the same index.
    pub modified: Vec<String>,
    /// Character-level difference in `[0, 100]`.
    pub percent_changed: f64,
    /// Changed regions, in paragraph order.
    pub changed_segments: Vec<ChangedSegment>,
    /// Byte length of the new version.
    pub new_len: usize,
}

impl ContentChange {
    /// A change describing identical content of `len` bytes.
    #[must_use]
    pub fn unchanged(len: usize) -> Self {
        Self {
            new_len: len,
            ..Self::default()
        }
    }

    /// Whether the versions were identical.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.changed_segments.is_empty() && self.percent_changed.abs() < f64::EPSILON
    }

    /// Percentage of the new document covered by added or modified segments.
    #[must_use]
    pub fn changed_share(&self) -> f64 {
        if self.new_len == 0 {
            return if self.changed_segments.is_empty() { 0.0 } else { 100.0 };
        }
        let touched: usize = merge_ranges(
            self.changed_segments
                .iter()
                .filter(|s| s.in_new_document())
                .map(ChangedSegment::span)
                .collect(),
        )
        .iter()
        .map(ExactSizeIterator::len)
        .sum();
        (touched as f64 / self.new_len as f64 * 100.0).min(100.0)
    }

    /// Whether the edit touches too much of the document to reconcile.
    #[must_use]
    pub fn is_pervasive(&self, threshold: f64) -> bool {
        self.changed_share() > threshold
    }

    /// Whether `term` overlaps a changed region or no longer fits the document.
    ///
    /// Uses the term midpoint, which tolerates small drift in positions
    /// carried over from the old version.
    #[must_use]
    pub fn invalidates(&self, term: &AnalyzedTerm) -> bool {
        if term.end_position > self.new_len {
            return true;
        }
        let midpoint = term.midpoint();
        self.changed_segments.iter().any(|s| s.contains(midpoint))
    }

    /// Whether `position` of the new document lies in an added or modified
    /// segment.
    #[must_use]
    pub fn covers(&self, position: usize) -> bool {
        self.changed_segments
            .iter()
            .any(|s| s.in_new_document() && s.contains(position))
    }

    /// The change without its new-document segments that overlap `ranges`.
    ///
    /// Terms under a dropped segment are neither invalidated nor covered, so
    /// a region that could not be re-analyzed keeps its previous terms.
    #[must_use]
    pub fn excluding(&self, ranges: &[Range<usize>]) -> Self {
        let mut kept = self.clone();
        kept.changed_segments.retain(|s| {
            !s.in_new_document() || !ranges.iter().any(|r| r.start < s.end && s.start < r.end)
        });
        kept
    }

    /// Byte ranges of `new` to re-analyze.
    ///
    /// Each added or modified segment is widened by `padding` bytes, snapped
    /// outward to whitespace so no word is cut, and overlapping windows are
    /// merged. Windows are sorted and disjoint.
    #[must_use]
    pub fn analysis_windows(&self, new: &str, padding: usize) -> Vec<Range<usize>> {
        let windows = self
            .changed_segments
            .iter()
            .filter(|s| s.in_new_document() && s.end <= new.len())
            .map(|s| {
                let start = widen_back(new, s.start.saturating_sub(padding));
                let end = widen_forward(new, (s.end + padding).min(new.len()));
                start..end
            })
            .collect();
        merge_ranges(windows)
    }
}

/// Compare two document versions.
///
/// ```rust
/// use lexiq_pipeline::{diff, SegmentKind};
///
/// let old = "Intro.\n\nThe pump is red. It hums.\n\nOutro.";
/// let new = "Intro.\n\nThe pump is blue. It hums.\n\nOutro.";
/// let change = diff(new, old);
///
/// assert_eq!(change.modified.len(), 1);
/// assert_eq!(change.changed_segments.len(), 1);
/// assert_eq!(change.changed_segments[0].content, "The pump is blue.");
/// assert_eq!(change.changed_segments[0].kind, SegmentKind::Modified);
/// ```
#[must_use]
pub fn diff(new: &str, old: &str) -> ContentChange {
    if new == old {
        return ContentChange::unchanged(new.len());
    }

    let new_paragraphs = paragraphs(new);
    let old_paragraphs = paragraphs(old);
    let mut change = ContentChange {
        percent_changed: percent_changed(new, old),
        new_len: new.len(),
        ..ContentChange::default()
    };

    for index in 0..new_paragraphs.len().max(old_paragraphs.len()) {
        match (new_paragraphs.get(index), old_paragraphs.get(index)) {
            (Some(n), Some(o)) if new[n.clone()] == old[o.clone()] => {}
            (Some(n), Some(o)) => {
                change.modified.push(new[n.clone()].to_string());
                let sentences = changed_sentences(new, n.clone(), &old[o.clone()]);
                if sentences.is_empty() {
                    // Only deletions inside the paragraph; invalidate all of it.
                    change.push_segment(new, n.clone(), SegmentKind::Modified);
                }
                for sentence in sentences {
                    change.push_segment(new, sentence, SegmentKind::Modified);
                }
            }
            (Some(n), None) => {
                change.added.push(new[n.clone()].to_string());
                change.push_segment(new, n.clone(), SegmentKind::Added);
            }
            (None, Some(o)) => {
                change.removed.push(old[o.clone()].to_string());
                change.push_segment(old, o.clone(), SegmentKind::Removed);
            }
            (None, None) => {}
        }
    }

    change
}

impl ContentChange {
    fn push_segment(&mut self, text: &str, range: Range<usize>, kind: SegmentKind) {
        self.changed_segments.push(ChangedSegment {
            content: text[range.clone()].to_string(),
            start: range.start,
            end: range.end,
            kind,
        });
    }
}

/// Character-level difference between two strings, in percent.
///
/// Counts mismatching characters over the common prefix window plus the
/// length difference, relative to the longer string.
#[must_use]
pub fn percent_changed(new: &str, old: &str) -> f64 {
    let new_len = new.chars().count();
    let old_len = old.chars().count();
    let longest = new_len.max(old_len);
    if longest == 0 {
        return 0.0;
    }

    let mismatches = new.chars().zip(old.chars()).filter(|(a, b)| a != b).count();
    let delta = new_len.abs_diff(old_len);
    ((mismatches + delta) as f64 / longest as f64 * 100.0).min(100.0)
}

/// Trimmed, non-blank paragraph ranges of `text`.
fn paragraphs(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for separator in PARAGRAPH_BREAK_RE.find_iter(text) {
        ranges.extend(trimmed(text, start..separator.start()));
        start = separator.end();
    }
    ranges.extend(trimmed(text, start..text.len()));
    ranges
}

/// Sentences of `new[paragraph]` that do not occur in `old_paragraph`.
fn changed_sentences(new: &str, paragraph: Range<usize>, old_paragraph: &str) -> Vec<Range<usize>> {
    let old_sentences: HashSet<&str> = old_paragraph
        .split_sentence_bounds()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    new[paragraph.clone()]
        .split_sentence_bound_indices()
        .filter_map(|(offset, sentence)| {
            let start = paragraph.start + offset;
            trimmed(new, start..start + sentence.len())
        })
        .filter(|range| !old_sentences.contains(&new[range.clone()]))
        .collect()
}

/// `range` without surrounding whitespace, or `None` if nothing is left.
fn trimmed(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    (lead < slice.len()).then(|| range.start + lead..range.end - trail)
}

/// Move `position` back to just after the previous whitespace.
fn widen_back(text: &str, position: usize) -> usize {
    let position = floor_char_boundary(text, position);
    text[..position]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8())
}

/// Move `position` forward to the next whitespace.
fn widen_forward(text: &str, position: usize) -> usize {
    let position = ceil_char_boundary(text, position);
    text[position..]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map_or(text.len(), |(i, _)| position + i)
}

/// Sort and merge overlapping or touching ranges.
fn merge_ranges(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}
