//! Near-duplicate term collapsing.
//!
//! Analyzers report every occurrence they see, and chunk overlap produces a
//! few more. Linguists want one row per logical term with a frequency count.
//!
//! ## Normalization
//!
//! ```text
//! "Café  Crème ,"  ──NFD──▶ "Cafe\u{301}  Cre\u{300}me ,"
//!                  ──strip marks, lowercase──▶ "cafe  creme ,"
//!                  ──collapse spacing──▶ "cafe creme,"
//! ```
//!
//! ## Similarity
//!
//! Normalized forms are compared with a length-normalized edit distance:
//!
//! ```text
//! similarity = (max(len1, len2) - levenshtein) / max(len1, len2)
//! ```
//!
//! Two forms are the same entity when the similarity exceeds the threshold the
//! [`SimilarityPolicy`] gives for the document language. Morphologically rich
//! languages want a tighter threshold than isolating ones, so the number is
//! configuration, not code.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::term::AnalyzedTerm;
use crate::{Error, Result};

/// Threshold used when no language-specific value is configured.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

static WHITESPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

static SPACE_BEFORE_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.;:!?)\]}»])").expect("static pattern"));

static SPACE_AFTER_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([(\[{«])\s+").expect("static pattern"));

/// Fold case, diacritics and punctuation spacing.
///
/// ```rust
/// use lexiq_pipeline::normalize;
///
/// assert_eq!(normalize("  Café  Crème , "), "cafe creme,");
/// assert_eq!(normalize("( Straße )"), "(straße)");
/// ```
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let collapsed = WHITESPACE_RUN_RE.replace_all(folded.trim(), " ");
    let collapsed = SPACE_BEFORE_CLOSE_RE.replace_all(&collapsed, "$1");
    SPACE_AFTER_OPEN_RE.replace_all(&collapsed, "$1").into_owned()
}

/// Edit-distance similarity in `[0, 1]`, measured in chars.
///
/// Two empty strings are identical.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    (longest - distance.min(longest)) as f64 / longest as f64
}

/// Supplies the similarity threshold for a language.
pub trait SimilarityPolicy: Send + Sync {
    /// Minimum similarity for two normalized forms to be merged.
    fn threshold(&self, language: &str) -> f64;
}

/// A single threshold for every language.
impl SimilarityPolicy for f64 {
    fn threshold(&self, _language: &str) -> f64 {
        *self
    }
}

/// Per-language thresholds with a fallback.
///
/// Lookup tries the full tag (`pt-br`), then its primary subtag (`pt`), then
/// the default. Tags are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageThresholds {
    /// Threshold for languages without an entry.
    pub default_threshold: f64,
    /// Language tag to threshold.
    pub languages: HashMap<String, f64>,
}

impl LanguageThresholds {
    /// Thresholds with only a default.
    #[must_use]
    pub fn uniform(default_threshold: f64) -> Self {
        Self {
            default_threshold,
            languages: HashMap::new(),
        }
    }

    /// Add or replace the threshold for a language tag.
    #[must_use]
    pub fn with_language(mut self, language: &str, threshold: f64) -> Self {
        self.languages.insert(language.to_ascii_lowercase(), threshold);
        self
    }

    /// Check every threshold lies in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let out_of_range = std::iter::once(("default", self.default_threshold))
            .chain(self.languages.iter().map(|(k, v)| (k.as_str(), *v)))
            .find(|(_, t)| !(0.0..=1.0).contains(t));

        match out_of_range {
            Some((language, threshold)) => Err(Error::InvalidConfig(format!(
                "similarity threshold {threshold} for {language} is outside [0, 1]"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for LanguageThresholds {
    fn default() -> Self {
        Self::uniform(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SimilarityPolicy for LanguageThresholds {
    fn threshold(&self, language: &str) -> f64 {
        let tag = language.trim().replace('_', "-");
        let lookup = |wanted: &str| {
            self.languages
                .iter()
                .find(|(key, _)| key.replace('_', "-").eq_ignore_ascii_case(wanted))
                .map(|(_, threshold)| *threshold)
        };

        lookup(&tag)
            .or_else(|| tag.split_once('-').and_then(|(primary, _)| lookup(primary)))
            .unwrap_or(self.default_threshold)
    }
}

/// Collapses near-duplicate term occurrences into single entries.
///
/// ## Example
///
/// ```rust
/// use lexiq_pipeline::{AnalyzedTerm, Classification, TermDeduplicator};
///
/// let dedup = TermDeduplicator::new(0.8);
/// let terms = vec![
///     AnalyzedTerm::new("Colour", 0, 6, Classification::Review),
///     AnalyzedTerm::new("colour", 40, 46, Classification::Review),
///     AnalyzedTerm::new("gearbox", 60, 67, Classification::Valid),
/// ];
///
/// let merged = dedup.deduplicate(terms, "en");
/// assert_eq!(merged.len(), 2);
/// assert_eq!(merged[0].frequency, 2);
/// assert_eq!(merged[0].start_position, 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TermDeduplicator<P = LanguageThresholds> {
    policy: P,
}

impl<P: SimilarityPolicy> TermDeduplicator<P> {
    /// Create a deduplicator using `policy` for thresholds.
    #[must_use]
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    /// The threshold policy.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Merge near-duplicates in `terms`.
    ///
    /// Terms are visited in position order and each one folds into the
    /// *first* earlier survivor that is similar enough, which keeps the
    /// output reproducible for identical input. Survivors keep their own
    /// text and position.
    #[must_use]
    pub fn deduplicate(&self, mut terms: Vec<AnalyzedTerm>, language: &str) -> Vec<AnalyzedTerm> {
        let threshold = self.policy.threshold(language);
        terms.sort_by_key(|t| t.start_position);

        let mut survivors: Vec<(String, AnalyzedTerm)> = Vec::with_capacity(terms.len());
        for term in terms {
            let key = normalize(&term.text);
            match survivors
                .iter_mut()
                .find(|(existing, _)| similarity(existing, &key) > threshold)
            {
                Some((_, survivor)) => absorb(survivor, term),
                None => survivors.push((key, term)),
            }
        }

        survivors.into_iter().map(|(_, term)| term).collect()
    }
}

/// Fold `absorbed` into `survivor`.
fn absorb(survivor: &mut AnalyzedTerm, absorbed: AnalyzedTerm) {
    survivor.frequency = survivor.frequency.saturating_add(absorbed.frequency);
    if absorbed.context.chars().count() > survivor.context.chars().count() {
        survivor.context = absorbed.context;
    }
    for suggestion in absorbed.suggestions {
        if !survivor.suggestions.contains(&suggestion) {
            survivor.suggestions.push(suggestion);
        }
    }
}
