//! Incremental Re-analysis
//!
//! Analyze a document, edit one sentence, and re-analyze only the edit.
//! A glossary-backed mock stands in for the remote analyzer.
//!
//! ```bash
//! RUST_LOG=lexiq_pipeline=debug cargo run --example incremental_session
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lexiq_pipeline::{
    AnalysisContext, AnalysisSession, AnalyzedTerm, Analyzer, AnalyzerError, AnalyzerResponse,
    ChunkOrchestrator, Classification, IncrementalCache, PipelineConfig,
};

const CONFIG: &str = r#"
[retry]
inter_chunk_delay_ms = 50

[dedup]
default_threshold = 0.85

[incremental]
window_padding = 40
"#;

/// Classifies words found in a fixed glossary.
struct Glossary {
    entries: HashMap<&'static str, Classification>,
    calls: AtomicUsize,
    bytes: AtomicUsize,
}

impl Glossary {
    fn new() -> Self {
        let entries = HashMap::from([
            ("torque", Classification::Valid),
            ("wrench", Classification::Valid),
            ("colour", Classification::Spelling),
            ("spanner", Classification::Review),
            ("gasket", Classification::Critical),
        ]);
        Self {
            entries,
            calls: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Analyzer for Glossary {
    async fn analyze(
        &self,
        text: &str,
        _context: &AnalysisContext,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(text.len(), Ordering::Relaxed);

        let lower = text.to_ascii_lowercase();
        let mut terms = Vec::new();
        for (&word, &class) in &self.entries {
            for (start, _) in lower.match_indices(word) {
                let surface = &text[start..start + word.len()];
                terms.push(AnalyzedTerm::new(surface, start, start + word.len(), class).with_score(80.0));
            }
        }
        Ok(AnalyzerResponse::from_terms(terms))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lexiq_pipeline=info".parse()?),
        )
        .init();

    let config = PipelineConfig::from_toml_str(CONFIG)?;
    let analyzer = Arc::new(Glossary::new());
    let orchestrator = Arc::new(ChunkOrchestrator::from_config(Arc::clone(&analyzer), &config)?);
    let cache = Arc::new(IncrementalCache::from_config(&config.cache)?);
    let session = AnalysisSession::new("manual-7", AnalysisContext::new("en-GB", "automotive"), orchestrator, cache)
        .with_config(&config);

    let draft = "Tighten the bolt with a torque wrench.\n\n\
        Replace the gasket if it shows wear. Check the colour of the fluid.\n\n\
        Keep the spanner in the tool tray.";
    let first = session.analyze(draft).await?;
    println!("Full run: {} terms, quality {:.1}", first.result.terms.len(), first.result.statistics.quality_score);

    let edited = draft.replace("Check the colour of the fluid.", "Check the colour and level of the fluid.");
    let before = analyzer.bytes.load(Ordering::Relaxed);
    let second = session.reanalyze(&edited).await?;
    let sent = analyzer.bytes.load(Ordering::Relaxed) - before;

    println!(
        "{:?} run: {} terms, {} of {} bytes re-sent, {}",
        second.mode,
        second.result.terms.len(),
        sent,
        edited.len(),
        second.coverage
    );
    for term in &second.result.terms {
        println!(
            "  {:>3}..{:<3} {:<8} {:<9} x{}  {}",
            term.start_position,
            term.end_position,
            term.text,
            term.classification.as_str(),
            term.frequency,
            term.context
        );
    }

    let view = session.view();
    println!(
        "Calls: {}, progress {:.0}%",
        analyzer.calls.load(Ordering::Relaxed),
        view.progress.percent_complete()
    );
    Ok(())
}
