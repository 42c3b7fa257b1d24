//! Analyzed terms and analyzer payload ingestion.
//!
//! The analyzer speaks loosely typed JSON. Everything crossing into the
//! pipeline goes through [`RawTerm`] and is validated into an
//! [`AnalyzedTerm`] with a closed [`Classification`], a clamped score and a
//! sane span. Nothing untyped travels further in.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chunk::{ceil_char_boundary, floor_char_boundary};
use crate::error::AnalyzerError;
use crate::stats::AnalysisStatistics;

/// Context window (bytes on each side) used by [`extract_context`].
pub const DEFAULT_CONTEXT_WINDOW: usize = 50;

/// How the analyzer judged a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Matches the reference glossary.
    Valid,
    /// Plausible, but a linguist should look at it.
    Review,
    /// Conflicts with the reference glossary.
    Critical,
    /// Likely misspelled.
    Spelling,
    /// Grammatically wrong in context.
    Grammar,
}

impl Classification {
    /// All classifications, in reporting order.
    pub const ALL: [Self; 5] = [
        Self::Valid,
        Self::Review,
        Self::Critical,
        Self::Spelling,
        Self::Grammar,
    ];

    /// Parse a classification label, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "valid" => Some(Self::Valid),
            "review" => Some(Self::Review),
            "critical" => Some(Self::Critical),
            "spelling" => Some(Self::Spelling),
            "grammar" => Some(Self::Grammar),
            _ => None,
        }
    }

    /// Contribution of one term to the quality score.
    #[must_use]
    pub fn quality_weight(self) -> f64 {
        match self {
            Self::Valid => 1.0,
            Self::Review => 0.5,
            Self::Critical | Self::Spelling | Self::Grammar => 0.0,
        }
    }

    /// Lowercase label as used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Review => "review",
            Self::Critical => "critical",
            Self::Spelling => "spelling",
            Self::Grammar => "grammar",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified term occurrence.
///
/// Positions are byte offsets. They are chunk-local when produced by the
/// analyzer and document-global once they have passed through
/// [`merge_chunk_results`](crate::merge_chunk_results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedTerm {
    /// The term as it appears in the text.
    pub text: String,
    /// Start offset (inclusive).
    pub start_position: usize,
    /// End offset (exclusive).
    pub end_position: usize,
    /// Analyzer verdict.
    pub classification: Classification,
    /// Confidence in `[0, 100]`.
    pub score: f64,
    /// Number of occurrences folded into this entry.
    pub frequency: u32,
    /// Surrounding sentence or excerpt.
    pub context: String,
    /// Why the analyzer chose this classification.
    pub rationale: String,
    /// Replacement candidates.
    pub suggestions: Vec<String>,
}

impl AnalyzedTerm {
    /// A term with neutral defaults, mostly for building fixtures.
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        start_position: usize,
        end_position: usize,
        classification: Classification,
    ) -> Self {
        Self {
            text: text.into(),
            start_position,
            end_position,
            classification,
            score: 0.0,
            frequency: 1,
            context: String::new(),
            rationale: String::new(),
            suggestions: Vec::new(),
        }
    }

    /// Set the confidence score, clamped to `[0, 100]`.
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = clamp_score(score);
        self
    }

    /// Set the context excerpt.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// The byte span of this term.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.start_position..self.end_position
    }

    /// Middle of the span, rounded down.
    #[must_use]
    pub fn midpoint(&self) -> usize {
        self.start_position + (self.end_position - self.start_position) / 2
    }

    /// Move both offsets forward by `offset`.
    #[must_use]
    pub fn shifted(mut self, offset: usize) -> Self {
        self.start_position += offset;
        self.end_position += offset;
        self
    }
}

/// Analyzer output for one request, after validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerResponse {
    /// Terms with request-local positions.
    pub terms: Vec<AnalyzedTerm>,
    /// Statistics as computed by the service, if it sent any.
    ///
    /// The pipeline never trusts these; it recomputes from the merged set.
    pub statistics: Option<AnalysisStatistics>,
}

impl AnalyzerResponse {
    /// A response carrying only terms.
    #[must_use]
    pub fn from_terms(terms: Vec<AnalyzedTerm>) -> Self {
        Self {
            terms,
            statistics: None,
        }
    }

    /// Decode and validate a JSON payload.
    ///
    /// Individual malformed terms are dropped with a warning; a payload that
    /// is not JSON of the expected shape fails as a whole.
    pub fn from_json(payload: &str) -> Result<Self, AnalyzerError> {
        let raw: RawAnalysis = serde_json::from_str(payload)
            .map_err(|e| AnalyzerError::InvalidPayload(e.to_string()))?;

        let terms = raw
            .terms
            .into_iter()
            .filter_map(|term| match AnalyzedTerm::try_from(term) {
                Ok(term) => Some(term),
                Err(err) => {
                    warn!(%err, "dropping malformed analyzer term");
                    None
                }
            })
            .collect();

        Ok(Self {
            terms,
            statistics: raw.statistics,
        })
    }
}

/// Analyzer response body as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    /// Unvalidated terms.
    #[serde(default)]
    pub terms: Vec<RawTerm>,
    /// Service-side statistics, ignored by the pipeline.
    #[serde(default)]
    pub statistics: Option<AnalysisStatistics>,
}

/// A term as received from the analyzer, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTerm {
    /// Term text.
    #[serde(default)]
    pub text: Option<String>,
    /// Start offset.
    #[serde(default, alias = "start")]
    pub start_position: Option<usize>,
    /// End offset.
    #[serde(default, alias = "end")]
    pub end_position: Option<usize>,
    /// Free-form classification label.
    #[serde(default)]
    pub classification: Option<String>,
    /// Confidence, any range.
    #[serde(default)]
    pub score: Option<f64>,
    /// Occurrence count, possibly zero or negative.
    #[serde(default)]
    pub frequency: Option<i64>,
    /// Context excerpt.
    #[serde(default)]
    pub context: Option<String>,
    /// Rationale text.
    #[serde(default)]
    pub rationale: Option<String>,
    /// Suggested replacements.
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
}

impl TryFrom<RawTerm> for AnalyzedTerm {
    type Error = AnalyzerError;

    fn try_from(raw: RawTerm) -> Result<Self, Self::Error> {
        let text = raw
            .text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AnalyzerError::InvalidPayload("term without text".to_string()))?;

        let start_position = raw.start_position.ok_or_else(|| {
            AnalyzerError::InvalidPayload(format!("term {text:?} has no start position"))
        })?;
        let end_position = raw.end_position.unwrap_or(start_position + text.len());
        if end_position < start_position {
            return Err(AnalyzerError::InvalidPayload(format!(
                "term {text:?} ends ({end_position}) before it starts ({start_position})"
            )));
        }

        let classification = match raw.classification.as_deref() {
            Some(label) => Classification::parse(label).unwrap_or_else(|| {
                warn!(label, term = %text, "unknown classification, treating as review");
                Classification::Review
            }),
            None => Classification::Review,
        };

        let mut suggestions: Vec<String> = Vec::new();
        for suggestion in raw.suggestions.unwrap_or_default() {
            let suggestion = suggestion.trim();
            if !suggestion.is_empty() && !suggestions.iter().any(|s| s == suggestion) {
                suggestions.push(suggestion.to_string());
            }
        }

        Ok(Self {
            text,
            start_position,
            end_position,
            classification,
            score: clamp_score(raw.score.unwrap_or(0.0)),
            frequency: raw
                .frequency
                .map_or(1, |f| u32::try_from(f.max(1)).unwrap_or(u32::MAX)),
            context: raw.context.unwrap_or_default(),
            rationale: raw.rationale.unwrap_or_default(),
            suggestions,
        })
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Excerpt `window` bytes either side of `[start, end)`.
///
/// Ellipses mark truncation at either end. The excerpt never extends past
/// the window; offsets are snapped inward to char boundaries.
///
/// ```rust
/// use lexiq_pipeline::extract_context;
///
/// let text = "The pump housing must be inspected weekly.";
/// assert_eq!(extract_context(text, 9, 16, 5), "...pump housing must...");
/// assert_eq!(extract_context(text, 0, 3, 100), text);
/// ```
#[must_use]
pub fn extract_context(text: &str, start: usize, end: usize, window: usize) -> String {
    let from = ceil_char_boundary(text, start.saturating_sub(window));
    let to = floor_char_boundary(text, end.saturating_add(window));
    if from >= to {
        return String::new();
    }

    let mut context = String::with_capacity(to - from + 6);
    if from > 0 {
        context.push_str("...");
    }
    context.push_str(&text[from..to]);
    if to < text.len() {
        context.push_str("...");
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parse_is_lenient() {
        assert_eq!(Classification::parse(" Valid "), Some(Classification::Valid));
        assert_eq!(Classification::parse("GRAMMAR"), Some(Classification::Grammar));
        assert_eq!(Classification::parse("meh"), None);
    }

    #[test]
    fn test_payload_normalization() {
        let payload = r#"{
            "terms": [
                {"text": "flange", "startPosition": 4, "endPosition": 10,
                 "classification": "CRITICAL", "score": 140, "frequency": 0,
                 "suggestions": ["rim", " rim ", ""]},
                {"text": "gasket", "start": 20, "classification": "weird"},
                {"text": "", "startPosition": 1},
                {"text": "bad", "startPosition": 9, "endPosition": 3}
            ]
        }"#;

        let response = AnalyzerResponse::from_json(payload).unwrap();
        assert_eq!(response.terms.len(), 2);

        let flange = &response.terms[0];
        assert_eq!(flange.classification, Classification::Critical);
        assert!((flange.score - 100.0).abs() < f64::EPSILON);
        assert_eq!(flange.frequency, 1);
        assert_eq!(flange.suggestions, vec!["rim".to_string()]);

        let gasket = &response.terms[1];
        assert_eq!(gasket.classification, Classification::Review);
        assert_eq!(gasket.span(), 20..26);
    }

    #[test]
    fn test_payload_rejects_non_json() {
        let err = AnalyzerResponse::from_json("<html>").unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidPayload(_)));
    }

    #[test]
    fn test_midpoint_and_shift() {
        let term = AnalyzedTerm::new("abc", 10, 15, Classification::Valid).shifted(5);
        assert_eq!(term.span(), 15..20);
        assert_eq!(term.midpoint(), 17);
    }

    #[test]
    fn test_extract_context_multibyte() {
        let text = "größe ändern";
        let context = extract_context(text, 7, 14, 1);
        assert!(context.starts_with("..."));
        assert!(context.contains("ändern"));
    }
}
