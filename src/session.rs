//! Per-document analysis sessions.
//!
//! A session ties the pipeline together for one document and is what a UI
//! talks to:
//!
//! ```text
//! analyze(content)   ──▶ chunk ▶ orchestrate ▶ merge ▶ dedup ▶ aggregate ──▶ cache.store
//! reanalyze(content) ──▶ cache.diff
//!                          ├─ miss ──────────────▶ full analysis
//!                          ├─ unchanged ─────────▶ cached result
//!                          ├─ pervasive edit ────▶ full analysis
//!                          └─ local edit ▶ analyze changed windows ▶ reconcile ──▶ cache.refresh
//! ```
//!
//! ## Overlapping Requests
//!
//! At most one run per session is live. Starting a run cancels the previous
//! one, which then returns [`Error::Cancelled`] at its next checkpoint. Each
//! run carries a generation number and only the current generation may write
//! the cache or the snapshot, so a stale run can never overwrite newer data.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::analyzer::{AnalysisContext, Analyzer};
use crate::cache::{CacheItem, CacheKey, CacheStore, IncrementalCache, LruStore};
use crate::cancel::CancelToken;
use crate::config::{IncrementalConfig, PipelineConfig};
use crate::diff::ContentChange;
use crate::merge::{AnalysisResult, MergedAnalysis, ResultMerger};
use crate::orchestrator::{ChunkOrchestrator, CoverageReport};
use crate::progress::{ChunkProgress, ProgressHandle};
use crate::stats::AnalysisStatistics;
use crate::term::AnalyzedTerm;
use crate::{Error, Result};

/// How a result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Every chunk of the document was analyzed.
    Full,
    /// Only changed windows were analyzed and reconciled with the cache.
    Incremental,
    /// Content matched the cache; nothing was analyzed.
    Unchanged,
}

/// The outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Terms and statistics.
    pub result: AnalysisResult,
    /// Chunks analyzed by this run and how many succeeded.
    pub coverage: CoverageReport,
    /// How the result was produced.
    pub mode: RunMode,
}

/// What a UI renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationState {
    /// Terms of the latest completed run.
    pub terms: Vec<AnalyzedTerm>,
    /// Statistics of the latest completed run.
    pub statistics: AnalysisStatistics,
    /// Coverage of the latest completed run.
    pub coverage: Option<CoverageReport>,
    /// Progress of the current or last run.
    pub progress: ChunkProgress,
    /// Whether a run is in flight.
    pub is_analyzing: bool,
}

#[derive(Debug, Default)]
struct RunState {
    generation: u64,
    in_flight: Option<CancelToken>,
    latest: Option<SessionSnapshot>,
}

/// Clears the in-flight marker when its run ends, if no newer run replaced it.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
    generation: u64,
    token: CancelToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == self.generation {
            state.in_flight = None;
        }
    }
}

/// Analysis of one document, full or incremental.
pub struct AnalysisSession<A, S = LruStore> {
    key: CacheKey,
    context: AnalysisContext,
    orchestrator: Arc<ChunkOrchestrator<A>>,
    merger: ResultMerger,
    cache: Arc<IncrementalCache<S>>,
    incremental: IncrementalConfig,
    progress: ProgressHandle,
    state: Mutex<RunState>,
}

impl<A: Analyzer, S: CacheStore> AnalysisSession<A, S> {
    /// A session for `document` sharing `orchestrator` and `cache`.
    pub fn new(
        document: impl Into<String>,
        context: AnalysisContext,
        orchestrator: Arc<ChunkOrchestrator<A>>,
        cache: Arc<IncrementalCache<S>>,
    ) -> Self {
        Self {
            key: CacheKey::new(document, &context.language, &context.domain),
            context,
            orchestrator,
            merger: ResultMerger::default(),
            cache,
            incremental: IncrementalConfig::default(),
            progress: ProgressHandle::new(),
            state: Mutex::new(RunState::default()),
        }
    }

    /// Take merger and incremental settings from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.merger = config.dedup.merger();
        self.incremental = config.incremental.clone();
        self
    }

    /// Replace the result merger.
    #[must_use]
    pub fn with_merger(mut self, merger: ResultMerger) -> Self {
        self.merger = merger;
        self
    }

    /// The cache key of this session's document.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Progress fraction of the current or last run.
    pub fn progress(&self) -> f64 {
        self.progress.fraction()
    }

    /// A handle for polling progress from elsewhere.
    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Whether a run is in flight.
    pub fn is_analyzing(&self) -> bool {
        self.lock_state().in_flight.is_some()
    }

    /// The latest completed run, if any.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.lock_state().latest.clone()
    }

    /// Everything a UI renders, in one read.
    pub fn view(&self) -> PresentationState {
        let state = self.lock_state();
        let latest = state.latest.as_ref();
        PresentationState {
            terms: latest.map(|s| s.result.terms.clone()).unwrap_or_default(),
            statistics: latest.map(|s| s.result.statistics.clone()).unwrap_or_default(),
            coverage: latest.map(|s| s.coverage.clone()),
            progress: self.progress.snapshot(),
            is_analyzing: state.in_flight.is_some(),
        }
    }

    /// Cancel the in-flight run, if any.
    pub fn cancel(&self) {
        if let Some(token) = &self.lock_state().in_flight {
            debug!(document = %self.key.document, "cancelling analysis");
            token.cancel();
        }
    }

    /// Analyze the whole document and replace the cached result.
    #[instrument(skip_all, fields(document = %self.key.document, len = content.len()))]
    pub async fn analyze(&self, content: &str) -> Result<SessionSnapshot> {
        let guard = self.begin_run();
        let outcome = self
            .full_run(content, &guard.token)
            .await
            .map(|(analysis, coverage)| (analysis, coverage, RunMode::Full));
        self.settle(&guard, content, outcome).await
    }

    /// Re-analyze only what changed since the cached version.
    ///
    /// Falls back to a full analysis when nothing is cached or the edit is
    /// too pervasive to reconcile.
    #[instrument(skip_all, fields(document = %self.key.document, len = content.len()))]
    pub async fn reanalyze(&self, content: &str) -> Result<SessionSnapshot> {
        let guard = self.begin_run();
        let outcome = match self.cache.diff(&self.key, content).await {
            Ok((item, change)) if change.is_unchanged() => {
                debug!("content unchanged; serving cached result");
                Ok((item.into_analysis(), CoverageReport::default(), RunMode::Unchanged))
            }
            Ok((item, change)) => match self.incremental_run(content, &item, &change, &guard.token).await {
                Err(Error::DiffAmbiguous { changed_share }) => {
                    debug!(changed_share, "edit too pervasive; running full analysis");
                    self.full_run(content, &guard.token)
                        .await
                        .map(|(analysis, coverage)| (analysis, coverage, RunMode::Full))
                }
                other => other.map(|(analysis, coverage)| (analysis, coverage, RunMode::Incremental)),
            },
            Err(Error::CacheMiss) => self
                .full_run(content, &guard.token)
                .await
                .map(|(analysis, coverage)| (analysis, coverage, RunMode::Full)),
            Err(err) => Err(err),
        };
        self.settle(&guard, content, outcome).await
    }

    async fn full_run(
        &self,
        content: &str,
        cancel: &CancelToken,
    ) -> Result<(MergedAnalysis, CoverageReport)> {
        let run = self
            .orchestrator
            .run(content, &self.context, cancel, &self.progress)
            .await?;
        let coverage = run.coverage.clone();
        let analysis = self
            .merger
            .assemble(run.merged_terms(), content, &self.context.language);
        Ok((analysis, coverage))
    }

    /// Analyze the changed windows and reconcile them with `cached`.
    ///
    /// A window whose chunks all fail counts as failed coverage, and its
    /// changed segments are left out of the reconciliation so the cached
    /// occurrences there survive. The run fails only when no chunk of any
    /// window succeeded.
    async fn incremental_run(
        &self,
        content: &str,
        cached: &CacheItem,
        change: &ContentChange,
        cancel: &CancelToken,
    ) -> Result<(MergedAnalysis, CoverageReport)> {
        if change.is_pervasive(self.incremental.ambiguity_threshold) {
            return Err(Error::DiffAmbiguous {
                changed_share: change.changed_share(),
            });
        }

        let windows = change.analysis_windows(content, self.incremental.window_padding);
        debug!(windows = windows.len(), segments = change.changed_segments.len(), "incremental run");
        self.progress.start(windows.len());

        let mut fresh = Vec::new();
        let mut unanalyzed = Vec::new();
        let mut coverage = CoverageReport::default();
        for (done, window) in windows.iter().enumerate() {
            let outcome = self
                .orchestrator
                .run(&content[window.clone()], &self.context, cancel, &ProgressHandle::new())
                .await;
            match outcome {
                Ok(run) => {
                    coverage = coverage.combine(&run.coverage);
                    unanalyzed.extend(
                        run.failed_spans()
                            .into_iter()
                            .map(|span| span.start + window.start..span.end + window.start),
                    );
                    fresh.extend(run.merged_terms().into_iter().map(|term| term.shifted(window.start)));
                }
                Err(Error::AllChunksFailed { total }) => {
                    warn!(window = ?window, "changed window could not be analyzed; keeping cached terms");
                    coverage = coverage.combine(&CoverageReport::failed(total));
                    unanalyzed.push(window.clone());
                }
                Err(err) => return Err(err),
            }
            self.progress.advance(done + 1);
        }

        if coverage.total > 0 && coverage.succeeded == 0 {
            return Err(Error::AllChunksFailed {
                total: coverage.total,
            });
        }

        let change = change.excluding(&unanalyzed);
        // Padding only gives the analyzer context; terms there are still cached.
        fresh.retain(|term| change.covers(term.midpoint()));
        let analysis = self.merger.reconcile(
            &cached.occurrences,
            fresh,
            &change,
            content,
            &self.context.language,
        );
        Ok((analysis, coverage))
    }

    /// Publish a run's outcome if it is still the current one.
    async fn settle(
        &self,
        guard: &RunGuard<'_>,
        content: &str,
        outcome: Result<(MergedAnalysis, CoverageReport, RunMode)>,
    ) -> Result<SessionSnapshot> {
        let (analysis, coverage, mode) = match outcome {
            Ok(done) => done,
            Err(err) if err.is_cancellation() => {
                debug!("analysis cancelled");
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "analysis failed");
                return Err(err);
            }
        };

        if guard.token.is_cancelled() || !self.is_current(guard.generation) {
            debug!("superseded run discarded");
            return Err(Error::Cancelled);
        }

        let result = analysis.result.clone();
        match mode {
            RunMode::Full => self.cache.store(self.key.clone(), content, analysis).await,
            RunMode::Incremental => self.cache.refresh(self.key.clone(), content, analysis).await,
            RunMode::Unchanged => {}
        }

        let snapshot = SessionSnapshot {
            result,
            coverage,
            mode,
        };
        let mut state = self.lock_state();
        if state.generation == guard.generation {
            state.latest = Some(snapshot.clone());
            self.progress.finish();
        }
        drop(state);

        info!(
            mode = ?snapshot.mode,
            terms = snapshot.result.terms.len(),
            coverage = %snapshot.coverage,
            "analysis complete"
        );
        Ok(snapshot)
    }

    fn begin_run(&self) -> RunGuard<'_> {
        let mut state = self.lock_state();
        if let Some(previous) = state.in_flight.take() {
            debug!(document = %self.key.document, "restarting: cancelling in-flight run");
            previous.cancel();
        }
        state.generation += 1;
        let token = CancelToken::new();
        state.in_flight = Some(token.clone());
        RunGuard {
            state: &self.state,
            generation: state.generation,
            token,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
