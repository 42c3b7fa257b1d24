//! Drives the analyzer across a document's chunks.
//!
//! ## Run Shape
//!
//! ```text
//! text ──▶ chunks ──▶ for each chunk, in index order:
//!                        cancelled? ──yes──▶ Err(Cancelled)
//!                        call with retry ──ok──▶ terms, then pace
//!                                        └─err─▶ empty terms, counted failed
//!                     ──▶ none succeeded? ──▶ Err(AllChunksFailed)
//!                     ──▶ ChunkRun { chunks, results, coverage }
//! ```
//!
//! Chunks are dispatched one at a time, so results are already in index
//! order when the merger consumes them.

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::analyzer::{AnalysisContext, Analyzer};
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::merge::merge_chunk_results;
use crate::progress::ProgressHandle;
use crate::retry::{call_with_retry, RetryPolicy};
use crate::term::AnalyzedTerm;
use crate::{Chunker, Error, Result, TextChunk, WindowChunker};

/// Documents up to this many bytes go to the analyzer in one call.
pub const DEFAULT_SMALL_DOCUMENT_THRESHOLD: usize = 5000;

/// Default pause between successful chunk calls.
pub const DEFAULT_INTER_CHUNK_DELAY: Duration = Duration::from_millis(500);

/// How many chunks of a run produced a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    /// Chunks with a response.
    pub succeeded: usize,
    /// Chunks attempted.
    pub total: usize,
    /// Indices of chunks that exhausted their retries.
    pub failed_chunks: Vec<usize>,
}

impl CoverageReport {
    /// A run of `total` chunks where none succeeded.
    #[must_use]
    pub fn failed(total: usize) -> Self {
        Self {
            succeeded: 0,
            total,
            failed_chunks: (0..total).collect(),
        }
    }

    /// Succeeded over total; `1.0` for a run with nothing to analyze.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    /// Whether some chunks were skipped.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.succeeded < self.total
    }

    /// Combine the coverage of two runs.
    #[must_use]
    pub fn combine(mut self, other: &Self) -> Self {
        let offset = self.total;
        self.succeeded += other.succeeded;
        self.total += other.total;
        self.failed_chunks
            .extend(other.failed_chunks.iter().map(|i| i + offset));
        self
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} chunks succeeded", self.succeeded, self.total)
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct ChunkRun {
    /// The chunks analyzed, in index order.
    pub chunks: Vec<TextChunk>,
    /// Chunk-local terms per chunk; empty for failed chunks.
    pub chunk_results: Vec<Vec<AnalyzedTerm>>,
    /// Success ratio of the run.
    pub coverage: CoverageReport,
}

impl ChunkRun {
    /// Logical spans of the chunks that produced no response.
    #[must_use]
    pub fn failed_spans(&self) -> Vec<Range<usize>> {
        self.coverage
            .failed_chunks
            .iter()
            .filter_map(|&index| self.chunks.get(index))
            .map(TextChunk::span)
            .collect()
    }

    /// Merge the per-chunk results into document coordinates.
    #[must_use]
    pub fn merged_terms(self) -> Vec<AnalyzedTerm> {
        merge_chunk_results(self.chunk_results, &self.chunks)
    }
}

/// Sequences analyzer calls over chunks with retry, pacing and cancellation.
#[derive(Debug, Clone)]
pub struct ChunkOrchestrator<A> {
    analyzer: A,
    chunker: WindowChunker,
    small_document_threshold: usize,
    retry: RetryPolicy,
    inter_chunk_delay: Duration,
}

impl<A: Analyzer> ChunkOrchestrator<A> {
    /// An orchestrator with default chunking, retry and pacing.
    #[must_use]
    pub fn new(analyzer: A) -> Self {
        Self {
            analyzer,
            chunker: WindowChunker::default(),
            small_document_threshold: DEFAULT_SMALL_DOCUMENT_THRESHOLD,
            retry: RetryPolicy::default(),
            inter_chunk_delay: DEFAULT_INTER_CHUNK_DELAY,
        }
    }

    /// An orchestrator configured from `config`.
    pub fn from_config(analyzer: A, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            analyzer,
            chunker: config.chunking.chunker()?,
            small_document_threshold: config.chunking.small_document_threshold,
            retry: config.retry.policy(),
            inter_chunk_delay: config.retry.inter_chunk_delay(),
        })
    }

    /// Replace the chunker.
    #[must_use]
    pub fn with_chunker(mut self, chunker: WindowChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the pause between successful chunk calls.
    #[must_use]
    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    /// Documents up to `threshold` bytes skip chunking.
    #[must_use]
    pub fn with_small_document_threshold(mut self, threshold: usize) -> Self {
        self.small_document_threshold = threshold;
        self
    }

    /// The analyzer behind this orchestrator.
    #[must_use]
    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// The chunks a run over `text` would dispatch.
    #[must_use]
    pub fn plan(&self, text: &str) -> Vec<TextChunk> {
        if text.len() <= self.small_document_threshold {
            vec![TextChunk::whole(text)]
        } else {
            self.chunker.chunk(text)
        }
    }

    /// Analyze every chunk of `text`.
    ///
    /// A chunk that exhausts its retries contributes no terms and the run
    /// continues; only cancellation or a run where nothing succeeded is an
    /// error.
    #[instrument(skip_all, fields(len = text.len(), language = %context.language))]
    pub async fn run(
        &self,
        text: &str,
        context: &AnalysisContext,
        cancel: &CancelToken,
        progress: &ProgressHandle,
    ) -> Result<ChunkRun> {
        let chunks = self.plan(text);
        let total = chunks.len();
        progress.start(total);

        if text.trim().is_empty() {
            debug!("blank document; nothing to analyze");
            return Ok(ChunkRun {
                chunk_results: vec![Vec::new(); total],
                chunks,
                coverage: CoverageReport::default(),
            });
        }

        let mut chunk_results = Vec::with_capacity(total);
        let mut coverage = CoverageReport {
            total,
            ..CoverageReport::default()
        };

        for chunk in &chunks {
            if cancel.is_cancelled() {
                debug!(chunk = chunk.chunk_index, "run cancelled before dispatch");
                return Err(Error::Cancelled);
            }

            let outcome = call_with_retry(&self.retry, cancel, chunk.chunk_index, || {
                self.analyzer.analyze(&chunk.content, context)
            })
            .await;

            match outcome {
                Ok(response) => {
                    debug!(chunk = chunk.chunk_index, terms = response.terms.len(), "chunk analyzed");
                    chunk_results.push(response.terms);
                    coverage.succeeded += 1;
                    progress.advance(chunk.chunk_index + 1);

                    if chunk.chunk_index + 1 < total {
                        self.pace(cancel).await?;
                    }
                }
                Err(Error::Cancelled) => {
                    debug!(chunk = chunk.chunk_index, "run cancelled during retry");
                    return Err(Error::Cancelled);
                }
                Err(err) => {
                    warn!(chunk = chunk.chunk_index, error = %err, "chunk skipped");
                    chunk_results.push(Vec::new());
                    coverage.failed_chunks.push(chunk.chunk_index);
                    progress.advance(chunk.chunk_index + 1);
                }
            }
        }

        if coverage.succeeded == 0 {
            warn!(total, "every chunk failed");
            return Err(Error::AllChunksFailed { total });
        }

        info!(%coverage, "chunk run complete");
        Ok(ChunkRun {
            chunks,
            chunk_results,
            coverage,
        })
    }

    /// Wait out the inter-chunk delay unless cancelled first.
    async fn pace(&self, cancel: &CancelToken) -> Result<()> {
        if self.inter_chunk_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = tokio::time::sleep(self.inter_chunk_delay) => Ok(()),
            () = cancel.cancelled() => {
                debug!("run cancelled while pacing");
                Err(Error::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_display_and_ratio() {
        let report = CoverageReport {
            succeeded: 1,
            total: 2,
            failed_chunks: vec![1],
        };
        assert_eq!(report.to_string(), "1/2 chunks succeeded");
        assert!((report.ratio() - 0.5).abs() < f64::EPSILON);
        assert!(report.is_partial());
        assert!((CoverageReport::default().ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_coverage_combine_offsets_indices() {
        let a = CoverageReport {
            succeeded: 2,
            total: 3,
            failed_chunks: vec![0],
        };
        let b = CoverageReport {
            succeeded: 0,
            total: 1,
            failed_chunks: vec![0],
        };
        let combined = a.combine(&b);
        assert_eq!(combined.to_string(), "2/4 chunks succeeded");
        assert_eq!(combined.failed_chunks, vec![0, 3]);
    }

    #[test]
    fn test_failed_window_counts_every_chunk() {
        let combined = CoverageReport {
            succeeded: 1,
            total: 1,
            failed_chunks: Vec::new(),
        }
        .combine(&CoverageReport::failed(2));

        assert_eq!(combined.to_string(), "1/3 chunks succeeded");
        assert_eq!(combined.failed_chunks, vec![1, 2]);
    }

    #[test]
    fn test_failed_spans_follow_coverage() {
        let text = "aaaa bbbb cccc dddd";
        let chunks = WindowChunker::new(10, 4).chunk(text);
        let run = ChunkRun {
            chunk_results: vec![Vec::new(); chunks.len()],
            coverage: CoverageReport {
                succeeded: 1,
                total: 2,
                failed_chunks: vec![1],
            },
            chunks,
        };
        assert_eq!(run.failed_spans(), vec![10..19]);
    }
}
