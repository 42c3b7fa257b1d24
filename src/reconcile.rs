//! Folding freshly analyzed terms into a previous result.
//!
//! ```text
//! old result ──drop terms whose midpoint is in a changed segment──┐
//!                                                                 ├──▶ concat ──▶ aggregate
//! new terms (document coordinates of the new version) ────────────┘
//! ```
//!
//! Retained terms keep their old offsets. The midpoint test tolerates the
//! small drift an edit elsewhere introduces; terms that no longer fit inside
//! the new document are dropped outright.
//!
//! [`ResultMerger::reconcile`] applies the same fold to occurrences and only
//! then collapses near-duplicates, so frequencies stay equal to a count over
//! the new version.

use tracing::debug;

use crate::dedup::SimilarityPolicy;
use crate::diff::ContentChange;
use crate::merge::{AnalysisResult, MergedAnalysis, ResultMerger};
use crate::term::AnalyzedTerm;

/// Terms of `old` that `change` leaves untouched.
#[must_use]
pub fn retained_terms(old: &[AnalyzedTerm], change: &ContentChange) -> Vec<AnalyzedTerm> {
    old.iter()
        .filter(|term| !change.invalidates(term))
        .cloned()
        .collect()
}

/// Combine the unaffected part of `old` with `new_terms`.
///
/// Without a previous result, `new_terms` is the whole result. Statistics
/// are always recomputed from the combined set.
///
/// ```rust
/// use lexiq_pipeline::{diff, reconcile, AnalysisResult, AnalyzedTerm, Classification};
///
/// let old_text = "Pump is red.\n\nValve is fine.";
/// let new_text = "Pump is blue.\n\nValve is fine.";
/// let old = AnalysisResult::from_terms(vec![
///     AnalyzedTerm::new("red", 8, 11, Classification::Review),
///     AnalyzedTerm::new("Valve", 14, 19, Classification::Valid),
/// ]);
///
/// let change = diff(new_text, old_text);
/// let fresh = vec![AnalyzedTerm::new("blue", 8, 12, Classification::Valid)];
/// let result = reconcile(Some(&old), fresh, &change);
///
/// let texts: Vec<_> = result.terms.iter().map(|t| t.text.as_str()).collect();
/// assert_eq!(texts, ["blue", "Valve"]);
/// assert_eq!(result.statistics.total_terms, 2);
/// ```
#[must_use]
pub fn reconcile(
    old: Option<&AnalysisResult>,
    new_terms: Vec<AnalyzedTerm>,
    change: &ContentChange,
) -> AnalysisResult {
    let Some(old) = old else {
        debug!("no previous result; using fresh terms only");
        return AnalysisResult::from_terms(sorted(new_terms));
    };
    if new_terms.is_empty() && change.is_unchanged() {
        return old.clone();
    }

    let mut terms = retained_terms(&old.terms, change);
    debug!(
        retained = terms.len(),
        dropped = old.terms.len() - terms.len(),
        fresh = new_terms.len(),
        "reconciling"
    );
    terms.extend(new_terms);
    AnalysisResult::from_terms(sorted(terms))
}

fn sorted(mut terms: Vec<AnalyzedTerm>) -> Vec<AnalyzedTerm> {
    terms.sort_by_key(|t| t.start_position);
    terms
}

impl<P: SimilarityPolicy> ResultMerger<P> {
    /// Fold `new_terms` into the occurrences behind a previous result, then
    /// collapse near-duplicates across retained and fresh occurrences.
    #[must_use]
    pub fn reconcile(
        &self,
        old: &[AnalyzedTerm],
        new_terms: Vec<AnalyzedTerm>,
        change: &ContentChange,
        document: &str,
        language: &str,
    ) -> MergedAnalysis {
        let mut occurrences = retained_terms(old, change);
        debug!(
            retained = occurrences.len(),
            dropped = old.len() - occurrences.len(),
            fresh = new_terms.len(),
            "reconciling occurrences"
        );
        occurrences.extend(new_terms);
        self.assemble(occurrences, document, language)
    }
}
