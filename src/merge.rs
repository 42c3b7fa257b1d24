//! Reassembly of per-chunk analyzer results.
//!
//! ## Position Arithmetic
//!
//! The analyzer reports offsets into the chunk `content` it was given, which
//! starts `overlap_start` bytes before the chunk's logical start:
//!
//! ```text
//! global = chunk.start_position + local - chunk.overlap_start
//! ```
//!
//! ## Boundary Duplicates
//!
//! Text near a cut is seen twice: once in the previous chunk's trailing
//! padding and once in this chunk's leading padding.
//!
//! ```text
//! chunk 0: [.......logical.......][pad]
//! chunk 1:                   [pad][.......logical.......]
//!                             ^^^ term here is reported by both
//! ```
//!
//! Terms starting inside a non-first chunk's leading padding are dropped; the
//! previous chunk already reported them. Anything still colliding on
//! `(text, global start)` keeps its first occurrence.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dedup::{LanguageThresholds, SimilarityPolicy, TermDeduplicator};
use crate::stats::{aggregate, AnalysisStatistics};
use crate::term::{extract_context, AnalyzedTerm, DEFAULT_CONTEXT_WINDOW};
use crate::TextChunk;

/// A term set together with the statistics computed from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Terms with document-global positions, sorted by start.
    pub terms: Vec<AnalyzedTerm>,
    /// Statistics for `terms`.
    pub statistics: AnalysisStatistics,
}

impl AnalysisResult {
    /// Wrap `terms` and compute their statistics.
    #[must_use]
    pub fn from_terms(terms: Vec<AnalyzedTerm>) -> Self {
        let statistics = aggregate(&terms);
        Self { terms, statistics }
    }

    /// Whether no terms were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// A result together with the occurrences it was collapsed from.
///
/// Incremental runs reconcile `occurrences`, not `result`: a collapsed entry
/// has lost the positions of the occurrences it absorbed, so its frequency
/// could not be corrected when some of them are edited away.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedAnalysis {
    /// One entry per detection, with context, sorted by start.
    pub occurrences: Vec<AnalyzedTerm>,
    /// `occurrences` after near-duplicate collapsing.
    pub result: AnalysisResult,
}

/// Remap chunk-local terms into document coordinates and drop duplicates.
///
/// `chunk_results[i]` holds the analyzer output for `chunks[i]`. The result
/// is sorted by start position. For a single-chunk document the mapping is
/// the identity, so positions come back unchanged.
///
/// Terms whose span falls outside their chunk or the document are discarded.
///
/// ```rust
/// use lexiq_pipeline::{merge_chunk_results, AnalyzedTerm, Chunker, Classification, WindowChunker};
///
/// let text = "aaaa bbbb cccc dddd";
/// let chunks = WindowChunker::new(10, 5).chunk(text);
/// assert_eq!(chunks[1].overlap_start, 5);
///
/// // "bbbb" at 5..9 is seen by chunk 0, and by chunk 1 inside its padding.
/// let results = vec![
///     vec![AnalyzedTerm::new("bbbb", 5, 9, Classification::Review)],
///     vec![
///         AnalyzedTerm::new("bbbb", 0, 4, Classification::Review),
///         AnalyzedTerm::new("dddd", 10, 14, Classification::Valid),
///     ],
/// ];
///
/// let merged = merge_chunk_results(results, &chunks);
/// assert_eq!(merged.len(), 2);
/// assert_eq!(merged[0].span(), 5..9);
/// assert_eq!(merged[1].span(), 15..19);
/// ```
#[must_use]
pub fn merge_chunk_results(
    chunk_results: Vec<Vec<AnalyzedTerm>>,
    chunks: &[TextChunk],
) -> Vec<AnalyzedTerm> {
    if chunk_results.len() != chunks.len() {
        debug!(
            results = chunk_results.len(),
            chunks = chunks.len(),
            "chunk result count differs from chunk count; extra entries ignored"
        );
    }

    let document_end = chunks.last().map_or(0, |c| c.end_position);
    let mut seen: HashSet<(String, usize)> = HashSet::new();
    let mut merged = Vec::with_capacity(chunk_results.iter().map(Vec::len).sum());

    for (chunk, terms) in chunks.iter().zip(chunk_results) {
        for term in terms {
            if !chunk.is_first() && chunk.in_start_overlap(term.start_position) {
                continue;
            }
            if term.end_position < term.start_position || term.end_position > chunk.content.len() {
                debug!(chunk = chunk.chunk_index, term = %term.text, "term span outside chunk");
                continue;
            }

            let (Some(start), Some(end)) = (
                chunk.to_global(term.start_position),
                chunk.to_global(term.end_position),
            ) else {
                continue;
            };
            if end > document_end {
                continue;
            }

            if seen.insert((term.text.clone(), start)) {
                merged.push(AnalyzedTerm {
                    start_position: start,
                    end_position: end,
                    ..term
                });
            }
        }
    }

    merged.sort_by_key(|t| t.start_position);
    merged
}

/// Turns merged terms into a final [`AnalysisResult`].
///
/// Fills missing contexts from the document, collapses near-duplicates (when
/// enabled) and recomputes statistics.
#[derive(Debug, Clone)]
pub struct ResultMerger<P = LanguageThresholds> {
    dedup: Option<TermDeduplicator<P>>,
    context_window: usize,
}

impl<P: SimilarityPolicy> ResultMerger<P> {
    /// A merger collapsing near-duplicates with `policy`.
    #[must_use]
    pub fn new(policy: P) -> Self {
        Self {
            dedup: Some(TermDeduplicator::new(policy)),
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// A merger that keeps every occurrence as its own entry.
    #[must_use]
    pub fn without_dedup() -> Self {
        Self {
            dedup: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Bytes of context extracted either side of a term lacking one.
    #[must_use]
    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    /// Collapse near-duplicates, if enabled, and sort by position.
    #[must_use]
    pub fn collapse(&self, terms: Vec<AnalyzedTerm>, language: &str) -> Vec<AnalyzedTerm> {
        let mut terms = match &self.dedup {
            Some(dedup) => dedup.deduplicate(terms, language),
            None => terms,
        };
        terms.sort_by_key(|t| t.start_position);
        terms
    }

    /// Extract a context from `document` for every term lacking one.
    pub fn fill_contexts(&self, terms: &mut [AnalyzedTerm], document: &str) {
        for term in terms.iter_mut().filter(|t| t.context.is_empty()) {
            term.context = extract_context(
                document,
                term.start_position,
                term.end_position,
                self.context_window,
            );
        }
    }

    /// Fill contexts from `document`, keep the occurrences and collapse a
    /// copy of them into the final result.
    #[must_use]
    pub fn assemble(
        &self,
        mut occurrences: Vec<AnalyzedTerm>,
        document: &str,
        language: &str,
    ) -> MergedAnalysis {
        self.fill_contexts(&mut occurrences, document);
        occurrences.sort_by_key(|t| t.start_position);
        let result = AnalysisResult::from_terms(self.collapse(occurrences.clone(), language));
        MergedAnalysis {
            occurrences,
            result,
        }
    }

    /// Produce the final result for `document`.
    #[must_use]
    pub fn finalize(&self, terms: Vec<AnalyzedTerm>, document: &str, language: &str) -> AnalysisResult {
        self.assemble(terms, document, language).result
    }
}

impl Default for ResultMerger<LanguageThresholds> {
    fn default() -> Self {
        Self::new(LanguageThresholds::default())
    }
}
