//! Pipeline configuration.
//!
//! Every component receives its settings at construction; there is no global
//! state. A complete configuration in TOML:
//!
//! ```toml
//! [chunking]
//! max_chunk_size = 4000
//! overlap_size = 150
//! sentence_lookback = 500
//! small_document_threshold = 5000
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 8000
//! call_timeout_secs = 120
//! inter_chunk_delay_ms = 500
//!
//! [cache]
//! capacity = 64
//! ttl_secs = 3600
//!
//! [dedup]
//! enabled = true
//! default_threshold = 0.85
//! languages = { fi = 0.9, zh = 0.75 }
//!
//! [incremental]
//! ambiguity_threshold = 60.0
//! window_padding = 200
//! ```
//!
//! Missing sections and keys take the defaults shown.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dedup::LanguageThresholds;
use crate::merge::ResultMerger;
use crate::orchestrator::{DEFAULT_INTER_CHUNK_DELAY, DEFAULT_SMALL_DOCUMENT_THRESHOLD};
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::window::DEFAULT_SENTENCE_LOOKBACK;
use crate::{Error, Result, WindowChunker};

/// Settings for every pipeline component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunker and small-document bypass.
    pub chunking: ChunkingConfig,
    /// Per-chunk retry, timeout and pacing.
    pub retry: RetryConfig,
    /// Incremental cache sizing.
    pub cache: CacheConfig,
    /// Near-duplicate collapsing.
    pub dedup: DedupConfig,
    /// Diff-driven re-analysis.
    pub incremental: IncrementalConfig,
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component could run with.
    pub fn validate(&self) -> Result<()> {
        self.chunking.chunker()?;
        self.retry.policy().validate()?;
        self.dedup.thresholds.validate()?;

        if self.cache.capacity == 0 {
            return Err(Error::InvalidConfig("cache capacity must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.incremental.ambiguity_threshold) {
            return Err(Error::InvalidConfig(format!(
                "ambiguity_threshold {} is outside [0, 100]",
                self.incremental.ambiguity_threshold
            )));
        }
        Ok(())
    }
}

/// Chunker settings, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Largest logical window.
    pub max_chunk_size: usize,
    /// Padding taken from each neighbour.
    pub overlap_size: usize,
    /// How far back from a cut to look for a sentence end.
    pub sentence_lookback: usize,
    /// Documents up to this size skip chunking.
    pub small_document_threshold: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 4000,
            overlap_size: 150,
            sentence_lookback: DEFAULT_SENTENCE_LOOKBACK,
            small_document_threshold: DEFAULT_SMALL_DOCUMENT_THRESHOLD,
        }
    }
}

impl ChunkingConfig {
    /// Build the configured chunker.
    pub fn chunker(&self) -> Result<WindowChunker> {
        Ok(WindowChunker::try_new(self.max_chunk_size, self.overlap_size)?
            .with_lookback(self.sentence_lookback))
    }
}

/// Retry, timeout and pacing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per chunk, including the first.
    pub max_attempts: u32,
    /// First backoff delay.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Wall-clock ceiling per analyzer call.
    pub call_timeout_secs: u64,
    /// Pause between successful chunk calls.
    pub inter_chunk_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            call_timeout_secs: 120,
            inter_chunk_delay_ms: DEFAULT_INTER_CHUNK_DELAY.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    /// The configured retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    /// The configured pause between chunk calls.
    #[must_use]
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

/// Incremental cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Documents held before the least recently used is evicted.
    pub capacity: usize,
    /// Lifetime of an entry since its last write.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Near-duplicate collapsing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Collapse near-duplicates at all.
    pub enabled: bool,
    /// Per-language similarity thresholds.
    #[serde(flatten)]
    pub thresholds: LanguageThresholds,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: LanguageThresholds::default(),
        }
    }
}

impl DedupConfig {
    /// The configured result merger.
    #[must_use]
    pub fn merger(&self) -> ResultMerger {
        if self.enabled {
            ResultMerger::new(self.thresholds.clone())
        } else {
            ResultMerger::without_dedup()
        }
    }
}

/// Diff-driven re-analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Percentage of the new document touched by an edit above which the
    /// whole document is re-analyzed instead.
    pub ambiguity_threshold: f64,
    /// Bytes of surrounding text re-analyzed with each changed span.
    pub window_padding: usize,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            ambiguity_threshold: 60.0,
            window_padding: 200,
        }
    }
}
