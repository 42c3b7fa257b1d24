//! End-to-end tests for orchestration and incremental sessions.
//!
//! Every test runs on a paused clock, so backoff, pacing and timeouts are
//! measured exactly without waiting for them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lexiq_pipeline::{
    AnalysisContext, AnalysisSession, AnalyzedTerm, Analyzer, AnalyzerError, AnalyzerResponse,
    CancelToken, ChunkOrchestrator, Classification, Error, IncrementalCache, LanguageThresholds,
    PipelineConfig, ProgressHandle, ResultMerger, RunMode, WindowChunker,
};
use tokio::time::Instant;
use unicode_segmentation::UnicodeSegmentation;

// =============================================================================
// Scripted Analyzer
// =============================================================================

type Script = dyn Fn(usize, &str) -> Result<AnalyzerResponse, AnalyzerError> + Send + Sync;
type Delay = dyn Fn(usize) -> Duration + Send + Sync;

/// An analyzer that answers from a script and records what it was sent.
struct Scripted {
    seen: Mutex<Vec<String>>,
    script: Box<Script>,
    delay: Box<Delay>,
}

impl Scripted {
    fn new(
        script: impl Fn(usize, &str) -> Result<AnalyzerResponse, AnalyzerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            script: Box::new(script),
            delay: Box::new(|_| Duration::ZERO),
        }
    }

    fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyzer for Scripted {
    async fn analyze(
        &self,
        text: &str,
        _context: &AnalysisContext,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(text.to_string());
            seen.len() - 1
        };
        let delay = (self.delay)(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.script)(call, text)
    }
}

/// Every word of four letters or more, as a review term.
fn words(text: &str) -> Vec<AnalyzedTerm> {
    text.split_word_bound_indices()
        .filter(|(_, w)| w.len() >= 4 && w.chars().all(char::is_alphanumeric))
        .map(|(i, w)| AnalyzedTerm::new(w, i, i + w.len(), Classification::Review))
        .collect()
}

fn word_finder() -> Scripted {
    Scripted::new(|_, text| Ok(AnalyzerResponse::from_terms(words(text))))
}

fn network() -> AnalyzerError {
    AnalyzerError::Network("connection reset".into())
}

fn context() -> AnalysisContext {
    AnalysisContext::new("en", "maintenance")
}

fn spans(terms: &[AnalyzedTerm]) -> Vec<(String, usize, usize)> {
    terms
        .iter()
        .map(|t| (t.text.clone(), t.start_position, t.end_position))
        .collect()
}

// =============================================================================
// Orchestrator
// =============================================================================

const TWO_SENTENCES: &str = "Alpha valve sentence here. Beta FAIL sentence here.";

fn two_chunk_orchestrator(analyzer: Arc<Scripted>) -> ChunkOrchestrator<Arc<Scripted>> {
    ChunkOrchestrator::new(analyzer)
        .with_chunker(WindowChunker::new(40, 5))
        .with_small_document_threshold(0)
}

#[tokio::test(start_paused = true)]
async fn failed_chunk_is_skipped_and_reported() {
    let analyzer = Arc::new(Scripted::new(|_, text| {
        if text.contains("FAIL") {
            return Err(network());
        }
        let terms = text
            .match_indices("valve")
            .map(|(i, m)| AnalyzedTerm::new(m, i, i + m.len(), Classification::Critical))
            .collect();
        Ok(AnalyzerResponse::from_terms(terms))
    }));
    let orchestrator = two_chunk_orchestrator(Arc::clone(&analyzer));
    assert_eq!(orchestrator.plan(TWO_SENTENCES).len(), 2);

    let run = orchestrator
        .run(TWO_SENTENCES, &context(), &CancelToken::new(), &ProgressHandle::new())
        .await
        .unwrap();

    // One call for the first chunk, three attempts for the second.
    assert_eq!(analyzer.calls(), 4);
    assert_eq!(run.coverage.to_string(), "1/2 chunks succeeded");
    assert_eq!(run.coverage.failed_chunks, vec![1]);

    let terms = run.merged_terms();
    assert_eq!(spans(&terms), vec![("valve".to_string(), 6, 11)]);
}

#[tokio::test(start_paused = true)]
async fn run_fails_when_every_chunk_fails() {
    let analyzer = Arc::new(Scripted::new(|_, _| Err(network())));
    let orchestrator = two_chunk_orchestrator(Arc::clone(&analyzer));

    let err = orchestrator
        .run(TWO_SENTENCES, &context(), &CancelToken::new(), &ProgressHandle::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AllChunksFailed { total: 2 }));
    assert_eq!(analyzer.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_before_the_next_chunk() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let analyzer = Arc::new(Scripted::new(move |_, _| {
        trigger.cancel();
        Ok(AnalyzerResponse::default())
    }));
    let orchestrator = two_chunk_orchestrator(Arc::clone(&analyzer));

    let err = orchestrator
        .run(TWO_SENTENCES, &context(), &cancel, &ProgressHandle::new())
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn successful_chunks_are_paced() {
    let analyzer = Arc::new(word_finder());
    let orchestrator = ChunkOrchestrator::new(Arc::clone(&analyzer))
        .with_chunker(WindowChunker::new(10, 2))
        .with_small_document_threshold(0);
    let text = "abcdefghij".repeat(3);
    let progress = ProgressHandle::new();

    let started = Instant::now();
    let run = orchestrator
        .run(&text, &context(), &CancelToken::new(), &progress)
        .await
        .unwrap();

    assert_eq!(run.coverage.succeeded, 3);
    // Two pauses: none after the last chunk.
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
    assert!(progress.fraction() <= 0.99);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_exponentially() {
    let analyzer = Arc::new(Scripted::new(|call, _| {
        if call < 2 {
            Err(network())
        } else {
            Ok(AnalyzerResponse::default())
        }
    }));
    let orchestrator = ChunkOrchestrator::new(Arc::clone(&analyzer));

    let started = Instant::now();
    let run = orchestrator
        .run("Short text.", &context(), &CancelToken::new(), &ProgressHandle::new())
        .await
        .unwrap();

    assert_eq!(analyzer.calls(), 3);
    assert_eq!(run.coverage.to_string(), "1/1 chunks succeeded");
    // 1s, then 2s.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn slow_call_times_out_and_is_retried() {
    let analyzer = Arc::new(
        word_finder().with_delay(|call| {
            if call == 0 {
                Duration::from_secs(200)
            } else {
                Duration::ZERO
            }
        }),
    );
    let orchestrator = ChunkOrchestrator::new(Arc::clone(&analyzer));

    let started = Instant::now();
    let run = orchestrator
        .run("Gearbox check.", &context(), &CancelToken::new(), &ProgressHandle::new())
        .await
        .unwrap();

    assert_eq!(analyzer.calls(), 2);
    assert_eq!(spans(&run.merged_terms())[0].0, "Gearbox");
    // 120s timeout, then 1s backoff.
    assert_eq!(started.elapsed(), Duration::from_secs(121));
}

#[tokio::test(start_paused = true)]
async fn blank_document_makes_no_call() {
    let analyzer = Arc::new(word_finder());
    let orchestrator = ChunkOrchestrator::new(Arc::clone(&analyzer));

    let run = orchestrator
        .run("  \n\n ", &context(), &CancelToken::new(), &ProgressHandle::new())
        .await
        .unwrap();

    assert_eq!(analyzer.calls(), 0);
    assert!((run.coverage.ratio() - 1.0).abs() < f64::EPSILON);
    assert!(run.merged_terms().is_empty());
}

// =============================================================================
// Sessions
// =============================================================================

const MANUAL: &str =
    "The seal holds pressure.\n\nCheck the pump daily. Replace worn parts.\n\nLog every inspection.";

fn session(analyzer: Arc<Scripted>) -> AnalysisSession<Arc<Scripted>> {
    let cache = Arc::new(IncrementalCache::with_capacity(16, Duration::from_secs(600)).unwrap());
    let orchestrator = Arc::new(ChunkOrchestrator::new(analyzer));
    AnalysisSession::new("manual", context(), orchestrator, cache)
}

#[tokio::test(start_paused = true)]
async fn incremental_result_matches_full_analysis() {
    let analyzer = Arc::new(word_finder());
    let mut config = PipelineConfig::default();
    config.incremental.window_padding = 5;
    let session = session(Arc::clone(&analyzer))
        .with_config(&config)
        .with_merger(ResultMerger::without_dedup());

    let first = session.analyze(MANUAL).await.unwrap();
    assert_eq!(first.mode, RunMode::Full);

    let edited = MANUAL.replace("seal", "cord");
    let second = session.reanalyze(&edited).await.unwrap();
    assert_eq!(second.mode, RunMode::Incremental);

    let full = ResultMerger::<f64>::without_dedup().finalize(words(&edited), &edited, "en");
    assert_eq!(spans(&second.result.terms), spans(&full.terms));
    assert_eq!(second.result.statistics.total_terms, full.terms.len());

    // Only the edited sentence and its padding went back to the analyzer.
    let seen = analyzer.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].len() < edited.len());
    assert!(seen[1].starts_with("The cord holds pressure."));
}

/// Every "colour", as a spelling term.
fn colours(text: &str) -> Vec<AnalyzedTerm> {
    text.match_indices("colour")
        .map(|(i, m)| AnalyzedTerm::new(m, i, i + m.len(), Classification::Spelling))
        .collect()
}

fn frequencies(terms: &[AnalyzedTerm]) -> Vec<(String, usize, u32)> {
    terms
        .iter()
        .map(|t| (t.text.clone(), t.start_position, t.frequency))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn incremental_frequencies_match_full_analysis_across_edits() {
    let analyzer = Arc::new(Scripted::new(|_, text| Ok(AnalyzerResponse::from_terms(colours(text)))));
    let session = session(Arc::clone(&analyzer));
    let merger = ResultMerger::<LanguageThresholds>::default();

    let first = session
        .analyze("Pick a colour for the panel.\n\nAny colour.")
        .await
        .unwrap();
    assert_eq!(frequencies(&first.result.terms), vec![("colour".to_string(), 7, 2)]);

    let edits = [
        ("Pick a colour for the panel.\n\nAny colour will do.", 2),
        ("Pick a colour for the panel.\n\nAny colour will do fine.", 2),
        ("Pick a finish for the panel.\n\nAny colour will do fine.", 1),
    ];
    for (edited, expected) in edits {
        let snapshot = session.reanalyze(edited).await.unwrap();
        assert_eq!(snapshot.mode, RunMode::Incremental);

        let full = merger.finalize(colours(edited), edited, "en");
        assert_eq!(frequencies(&snapshot.result.terms), frequencies(&full.terms));
        assert_eq!(snapshot.result.terms[0].frequency, expected);
        assert_eq!(snapshot.result.statistics, full.statistics);
    }
    assert_eq!(analyzer.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn deduplicated_incremental_result_matches_full_analysis() {
    let analyzer = Arc::new(word_finder());
    let mut config = PipelineConfig::default();
    config.incremental.window_padding = 5;
    let session = session(Arc::clone(&analyzer)).with_config(&config);

    session.analyze(MANUAL).await.unwrap();
    let mut current = MANUAL.to_string();
    // Each edit keeps lengths, and each adds another "pump".
    for (from, to) in [("seal", "pump"), ("daily", "often"), ("worn", "pump")] {
        let edited = current.replace(from, to);
        let snapshot = session.reanalyze(&edited).await.unwrap();
        assert_eq!(snapshot.mode, RunMode::Incremental);

        let full = config.dedup.merger().finalize(words(&edited), &edited, "en");
        assert_eq!(frequencies(&snapshot.result.terms), frequencies(&full.terms));
        assert_eq!(snapshot.result.statistics.total_terms, full.statistics.total_terms);
        current = edited;
    }

    let pump = session.snapshot().unwrap().result.terms.into_iter().find(|t| t.text == "pump");
    assert_eq!(pump.map(|t| t.frequency), Some(3));
}

const SECTIONS: &str = "Alpha paragraph stays.\n\nBeta paragraph here.\n\nGamma paragraph stays.\n\n\
    Delta paragraph here.\n\nOmega paragraph stays.";

fn failing_on(marker: &'static str) -> Scripted {
    Scripted::new(move |_, text| {
        if text.contains(marker) {
            Err(network())
        } else {
            Ok(AnalyzerResponse::from_terms(words(text)))
        }
    })
}

#[tokio::test(start_paused = true)]
async fn failed_window_keeps_cached_terms() {
    let analyzer = Arc::new(failing_on("Zeta"));
    let mut config = PipelineConfig::default();
    config.incremental.window_padding = 5;
    let session = session(Arc::clone(&analyzer)).with_config(&config);
    session.analyze(SECTIONS).await.unwrap();

    let edited = SECTIONS.replace("Beta", "Theta").replace("Delta", "Zeta");
    let snapshot = session.reanalyze(&edited).await.unwrap();

    assert_eq!(snapshot.mode, RunMode::Incremental);
    assert_eq!(snapshot.coverage.to_string(), "1/2 chunks succeeded");
    assert_eq!(snapshot.coverage.failed_chunks, vec![1]);

    let texts: Vec<_> = snapshot.result.terms.iter().map(|t| t.text.as_str()).collect();
    assert!(texts.contains(&"Theta"));
    assert!(!texts.contains(&"Beta"));
    // The failed window's paragraph still shows its previous terms.
    assert!(texts.contains(&"Delta"));
    assert!(!texts.contains(&"Zeta"));

    assert_eq!(session.snapshot().unwrap(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn incremental_run_fails_only_when_every_window_fails() {
    let analyzer = Arc::new(Scripted::new(|_, text| {
        if text.contains("Theta") || text.contains("Zeta") {
            Err(network())
        } else {
            Ok(AnalyzerResponse::from_terms(words(text)))
        }
    }));
    let mut config = PipelineConfig::default();
    config.incremental.window_padding = 5;
    let session = session(Arc::clone(&analyzer)).with_config(&config);
    let first = session.analyze(SECTIONS).await.unwrap();

    let edited = SECTIONS.replace("Beta", "Theta").replace("Delta", "Zeta");
    let err = session.reanalyze(&edited).await.unwrap_err();

    assert!(matches!(err, Error::AllChunksFailed { total: 2 }));
    // One full call, then three attempts per window.
    assert_eq!(analyzer.calls(), 7);
    assert_eq!(session.snapshot().unwrap(), first);
}

#[tokio::test(start_paused = true)]
async fn unchanged_content_is_served_from_cache() {
    let analyzer = Arc::new(word_finder());
    let session = session(Arc::clone(&analyzer));

    let first = session.analyze(MANUAL).await.unwrap();
    let second = session.reanalyze(MANUAL).await.unwrap();

    assert_eq!(second.mode, RunMode::Unchanged);
    assert_eq!(second.result, first.result);
    assert_eq!(analyzer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn reanalyze_without_cache_runs_full() {
    let analyzer = Arc::new(word_finder());
    let session = session(Arc::clone(&analyzer));

    let snapshot = session.reanalyze(MANUAL).await.unwrap();
    assert_eq!(snapshot.mode, RunMode::Full);
    assert_eq!(snapshot.coverage.to_string(), "1/1 chunks succeeded");
}

#[tokio::test(start_paused = true)]
async fn pervasive_edit_runs_full() {
    let analyzer = Arc::new(word_finder());
    let session = session(Arc::clone(&analyzer));

    session.analyze("Alpha beta gamma.").await.unwrap();
    let rewritten = "Completely different words here now.";
    let snapshot = session.reanalyze(rewritten).await.unwrap();

    assert_eq!(snapshot.mode, RunMode::Full);
    assert_eq!(analyzer.seen()[1], rewritten);
}

#[tokio::test(start_paused = true)]
async fn restart_cancels_the_older_run() {
    let analyzer = Arc::new(word_finder().with_delay(|call| {
        if call == 0 {
            Duration::from_secs(10)
        } else {
            Duration::ZERO
        }
    }));
    let cache = Arc::new(IncrementalCache::with_capacity(16, Duration::from_secs(600)).unwrap());
    let orchestrator = Arc::new(ChunkOrchestrator::new(Arc::clone(&analyzer)));
    let session = AnalysisSession::new("manual", context(), orchestrator, Arc::clone(&cache));

    let (stale, fresh) = tokio::join!(session.analyze("Old draft text."), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.analyze("New draft text.").await
    });

    assert!(stale.unwrap_err().is_cancellation());
    let fresh = fresh.unwrap();
    assert_eq!(fresh.result.terms[0].text, "draft");

    let cached = cache.lookup(session.key()).await.unwrap();
    assert_eq!(cached.content, "New draft text.");
    assert_eq!(session.snapshot().unwrap(), fresh);
    assert!(!session.is_analyzing());
}

#[tokio::test(start_paused = true)]
async fn view_reports_completed_run() {
    let analyzer = Arc::new(word_finder());
    let session = session(analyzer);

    let before = session.view();
    assert!(before.terms.is_empty());
    assert!(before.coverage.is_none());

    session.analyze(MANUAL).await.unwrap();
    let view = session.view();

    assert!(!view.is_analyzing);
    assert!(view.progress.is_complete());
    assert!((session.progress() - 1.0).abs() < f64::EPSILON);
    assert_eq!(view.terms.len(), view.statistics.total_terms);
    assert_eq!(view.coverage.unwrap().succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_run_publishes_nothing() {
    let analyzer = Arc::new(Scripted::new(|_, _| Err(network())));
    let session = session(Arc::clone(&analyzer));

    let err = session.analyze(MANUAL).await.unwrap_err();

    assert!(matches!(err, Error::AllChunksFailed { total: 1 }));
    assert!(session.snapshot().is_none());
    assert!(!session.is_analyzing());
    assert_eq!(analyzer.calls(), 3);
}
