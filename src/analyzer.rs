//! The remote analyzer collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AnalyzerError;
use crate::term::AnalyzerResponse;

/// Everything besides the text that an analyzer request carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    /// Reference glossary or source-language context.
    pub reference: String,
    /// Target language tag, e.g. `de` or `pt-BR`.
    pub language: String,
    /// Subject domain, e.g. `automotive`.
    pub domain: String,
    /// Service-specific options passed through untouched.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl AnalysisContext {
    /// Context for a language and domain, without a glossary.
    #[must_use]
    pub fn new(language: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Attach a reference glossary.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }
}

/// A term-classification service.
///
/// Implementations must be idempotent: the orchestrator retries failed calls
/// with the same input. Positions in the response are offsets into `text`.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Classify the terms found in `text`.
    async fn analyze(
        &self,
        text: &str,
        context: &AnalysisContext,
    ) -> Result<AnalyzerResponse, AnalyzerError>;
}

#[async_trait]
impl<A: Analyzer + ?Sized> Analyzer for Arc<A> {
    async fn analyze(
        &self,
        text: &str,
        context: &AnalysisContext,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        (**self).analyze(text, context).await
    }
}
