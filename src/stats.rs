//! Summary statistics over a term set.
//!
//! Statistics are a pure function of the terms they describe. They are never
//! patched in place: any change to a term set is followed by a fresh
//! [`aggregate`] call, so counters cannot drift from the data.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dedup::normalize;
use crate::term::{AnalyzedTerm, Classification};

/// Snapshot of counters and scores for a term set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisStatistics {
    /// Number of term entries.
    pub total_terms: usize,
    /// Entries classified `valid`.
    pub valid_terms: usize,
    /// Entries classified `review`.
    pub review_terms: usize,
    /// Entries classified `critical`.
    pub critical_terms: usize,
    /// Entries classified `spelling`.
    pub spelling_issues: usize,
    /// Entries classified `grammar`.
    pub grammar_issues: usize,
    /// Weighted share of acceptable terms, in `[0, 100]`.
    pub quality_score: f64,
    /// Lowest term score, 0 for an empty set.
    pub confidence_min: f64,
    /// Highest term score, 0 for an empty set.
    pub confidence_max: f64,
    /// Mean term score, 0 for an empty set.
    pub average_confidence: f64,
    /// Unique normalized terms over total entries, in `[0, 1]`.
    pub coverage: f64,
}

impl AnalysisStatistics {
    /// Count for one classification.
    #[must_use]
    pub fn count(&self, classification: Classification) -> usize {
        match classification {
            Classification::Valid => self.valid_terms,
            Classification::Review => self.review_terms,
            Classification::Critical => self.critical_terms,
            Classification::Spelling => self.spelling_issues,
            Classification::Grammar => self.grammar_issues,
        }
    }

    /// Entries that need a linguist's attention.
    #[must_use]
    pub fn flagged(&self) -> usize {
        self.total_terms - self.valid_terms
    }
}

/// Compute statistics for `terms`.
///
/// Valid terms count fully towards the quality score, review terms at half
/// weight, everything else not at all.
///
/// ```rust
/// use lexiq_pipeline::{aggregate, AnalyzedTerm, Classification};
///
/// let terms = vec![
///     AnalyzedTerm::new("pump", 0, 4, Classification::Valid).with_score(90.0),
///     AnalyzedTerm::new("valve", 5, 10, Classification::Review).with_score(60.0),
/// ];
/// let stats = aggregate(&terms);
///
/// assert_eq!(stats.total_terms, 2);
/// assert!((stats.quality_score - 75.0).abs() < 1e-9);
/// assert!((stats.confidence_min - 60.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn aggregate(terms: &[AnalyzedTerm]) -> AnalysisStatistics {
    if terms.is_empty() {
        return AnalysisStatistics::default();
    }

    let mut stats = AnalysisStatistics {
        total_terms: terms.len(),
        confidence_min: f64::INFINITY,
        confidence_max: f64::NEG_INFINITY,
        ..AnalysisStatistics::default()
    };

    let mut weighted = 0.0;
    let mut score_sum = 0.0;
    let mut unique = HashSet::with_capacity(terms.len());

    for term in terms {
        match term.classification {
            Classification::Valid => stats.valid_terms += 1,
            Classification::Review => stats.review_terms += 1,
            Classification::Critical => stats.critical_terms += 1,
            Classification::Spelling => stats.spelling_issues += 1,
            Classification::Grammar => stats.grammar_issues += 1,
        }
        weighted += term.classification.quality_weight();
        score_sum += term.score;
        stats.confidence_min = stats.confidence_min.min(term.score);
        stats.confidence_max = stats.confidence_max.max(term.score);
        unique.insert(normalize(&term.text));
    }

    let total = terms.len() as f64;
    stats.quality_score = (weighted / total * 100.0).clamp(0.0, 100.0);
    stats.average_confidence = score_sum / total;
    stats.coverage = unique.len() as f64 / total;
    stats
}
