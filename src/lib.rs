//! # lexiq-pipeline
//!
//! Chunked, incremental terminology analysis for translation QA.
//!
//! ## The Problem
//!
//! A term-classification service flags terminology, spelling and grammar
//! issues in a translation. It accepts a few thousand characters per call,
//! fails now and then, and rate-limits. Documents are longer than that, and
//! linguists edit them while they are being checked.
//!
//! So the pipeline has to:
//!
//! - split a document without cutting sentences or losing terms at the cuts
//! - drive the service with retries, pacing and cancellation
//! - put per-chunk answers back together in document coordinates
//! - after an edit, re-check only what changed
//!
//! ## Stages
//!
//! ```text
//! text ──▶ WindowChunker ──▶ ChunkOrchestrator ──▶ merge_chunk_results
//!                               │ (Analyzer)              │
//!                               ▼                         ▼
//!                          CoverageReport         ResultMerger: dedup + aggregate
//!                                                         │
//!                                                         ▼
//!                      IncrementalCache ◀── store / refresh ── MergedAnalysis
//!                             │
//!               next version ─┴─▶ diff ──▶ analysis_windows ──▶ reconcile
//! ```
//!
//! ### Chunking
//!
//! Windows of at most `max_chunk_size` bytes, cut after the nearest sentence
//! terminator within the last 500 bytes of the window. Each chunk carries
//! `overlap_size` bytes of its neighbours as padding:
//!
//! ```text
//! Document: "First sentence. Second sentence. Third sentence."
//! max 20, overlap 5
//!
//! Chunk 0: logical [0..15)   "First sentence."
//! Chunk 1: logical [15..32)  " Second sentence."   content "ence. Second sentence. Thir"
//! Chunk 2: logical [32..48)  " Third sentence."
//! ```
//!
//! ### Merging
//!
//! The analyzer answers in chunk-local offsets. The merger maps them back
//! (`global = start + local - overlap_start`), drops what a chunk saw only in
//! its leading padding, and removes exact `(text, start)` duplicates.
//! Near-duplicates ("Colour", "colour") are then folded into one entry with
//! a frequency.
//!
//! ### Incremental Re-analysis
//!
//! The cache keeps the last result, the occurrences behind it and the content
//! it came from. On the next version, [`diff`] finds changed paragraphs and
//! sentences, only those windows go back to the analyzer, and
//! [`ResultMerger::reconcile`] keeps every cached occurrence outside the
//! change before collapsing again.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use lexiq_pipeline::{
//!     AnalysisContext, AnalysisSession, AnalyzedTerm, Analyzer, AnalyzerError,
//!     AnalyzerResponse, ChunkOrchestrator, Classification, IncrementalCache, RunMode,
//! };
//!
//! /// Flags every "colour".
//! struct Spelling;
//!
//! #[async_trait]
//! impl Analyzer for Spelling {
//!     async fn analyze(
//!         &self,
//!         text: &str,
//!         _context: &AnalysisContext,
//!     ) -> Result<AnalyzerResponse, AnalyzerError> {
//!         let terms = text
//!             .match_indices("colour")
//!             .map(|(i, m)| AnalyzedTerm::new(m, i, i + m.len(), Classification::Spelling))
//!             .collect();
//!         Ok(AnalyzerResponse::from_terms(terms))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> lexiq_pipeline::Result<()> {
//! let cache = Arc::new(IncrementalCache::with_capacity(16, std::time::Duration::from_secs(600))?);
//! let orchestrator = Arc::new(ChunkOrchestrator::new(Spelling));
//! let session = AnalysisSession::new("doc-1", AnalysisContext::new("en-US", "print"), orchestrator, cache);
//!
//! let first = session.analyze("Pick a colour.\n\nAny colour.").await?;
//! assert_eq!(first.result.terms[0].frequency, 2);
//!
//! let second = session.reanalyze("Pick a colour.\n\nAny colour will do.").await?;
//! assert_eq!(second.mode, RunMode::Incremental);
//! assert_eq!(second.coverage.to_string(), "1/1 chunks succeeded");
//! assert_eq!(second.result.terms[0].frequency, 2);
//! # Ok(())
//! # }
//! ```

mod analyzer;
mod cache;
mod cancel;
mod chunk;
mod config;
mod dedup;
mod diff;
mod error;
mod merge;
mod orchestrator;
mod progress;
mod reconcile;
mod retry;
mod session;
mod stats;
mod term;
mod window;

pub use analyzer::{AnalysisContext, Analyzer};
pub use cache::{
    CacheItem, CacheKey, CacheStats, CacheStore, Fingerprint, IncrementalCache, LruStore,
};
pub use cancel::CancelToken;
pub use chunk::TextChunk;
pub use config::{
    CacheConfig, ChunkingConfig, DedupConfig, IncrementalConfig, PipelineConfig, RetryConfig,
};
pub use dedup::{
    normalize, similarity, LanguageThresholds, SimilarityPolicy, TermDeduplicator,
    DEFAULT_SIMILARITY_THRESHOLD,
};
pub use diff::{diff, percent_changed, ChangedSegment, ContentChange, SegmentKind};
pub use error::{AnalyzerError, Error, Result};
pub use merge::{merge_chunk_results, AnalysisResult, MergedAnalysis, ResultMerger};
pub use orchestrator::{
    ChunkOrchestrator, ChunkRun, CoverageReport, DEFAULT_INTER_CHUNK_DELAY,
    DEFAULT_SMALL_DOCUMENT_THRESHOLD,
};
pub use progress::{ChunkProgress, ProgressHandle, IN_FLIGHT_CAP};
pub use reconcile::{reconcile, retained_terms};
pub use retry::{
    call_with_retry, AttemptState, Backoff, RetryDecision, RetryMachine, RetryPolicy,
    DEFAULT_MAX_ATTEMPTS,
};
pub use session::{AnalysisSession, PresentationState, RunMode, SessionSnapshot};
pub use stats::{aggregate, AnalysisStatistics};
pub use term::{
    extract_context, AnalyzedTerm, AnalyzerResponse, Classification, RawAnalysis, RawTerm,
    DEFAULT_CONTEXT_WINDOW,
};
pub use window::{WindowChunker, DEFAULT_SENTENCE_LOOKBACK};

/// A strategy for splitting a document into analyzer-sized chunks.
///
/// ```rust
/// use lexiq_pipeline::{Chunker, TextChunk, WindowChunker};
///
/// fn plan(chunker: &dyn Chunker, text: &str) -> Vec<TextChunk> {
///     chunker.chunk(text)
/// }
///
/// let chunks = plan(&WindowChunker::new(4000, 150), "Short enough for one call.");
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].overlap_start, 0);
/// ```
pub trait Chunker: Send + Sync {
    /// Split text into chunks.
    ///
    /// Logical ranges of the returned chunks are contiguous, in order, and
    /// cover the whole text.
    fn chunk(&self, text: &str) -> Vec<TextChunk>;

    /// Estimate the number of chunks for a given text length.
    ///
    /// Useful for pre-allocation. May be approximate.
    fn estimate_chunks(&self, text_len: usize) -> usize {
        (text_len / 4000).max(1)
    }
}
