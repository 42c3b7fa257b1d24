//! Error types for the analysis pipeline.

use std::time::Duration;

/// Failures reported by an [`Analyzer`](crate::Analyzer) call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyzerError {
    /// Transport-level failure (connection reset, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The service answered, but with an error.
    #[error("service error ({status}): {message}")]
    Service {
        /// Status code reported by the service.
        status: u16,
        /// Message reported by the service.
        message: String,
    },

    /// The call exceeded its wall-clock ceiling.
    #[error("analyzer call timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be interpreted.
    #[error("invalid analyzer payload: {0}")]
    InvalidPayload(String),
}

impl AnalyzerError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// A malformed payload will be malformed again, so it is not retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidPayload(_))
    }
}

/// Errors that can occur while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration was rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single analyzer call failed.
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    /// A chunk exhausted its retry budget.
    #[error("chunk {chunk_index} failed after {attempts} attempt(s): {source}")]
    ChunkCallFailed {
        /// Index of the failing chunk.
        chunk_index: usize,
        /// Attempts made before giving up.
        attempts: u32,
        /// The last failure observed.
        #[source]
        source: AnalyzerError,
    },

    /// Every chunk of the run failed.
    #[error("all {total} chunk(s) failed")]
    AllChunksFailed {
        /// Number of chunks attempted.
        total: usize,
    },

    /// The run was cancelled by the caller.
    #[error("analysis cancelled")]
    Cancelled,

    /// No cached result exists for the document.
    #[error("no cached analysis for this document")]
    CacheMiss,

    /// The edit is too pervasive to reconcile incrementally.
    #[error("changed segments cover {changed_share:.1}% of the document; too pervasive to reconcile")]
    DiffAmbiguous {
        /// Percentage of the new document covered by changed segments.
        changed_share: f64,
    },

    /// A configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error represents a user-initiated cancellation.
    ///
    /// Cancellation is not a failure and should not be surfaced as one.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_errors_are_not_retryable() {
        assert!(!AnalyzerError::InvalidPayload("x".into()).is_retryable());
        assert!(AnalyzerError::Network("reset".into()).is_retryable());
        assert!(AnalyzerError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_cancellation_flag() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::AllChunksFailed { total: 2 }.is_cancellation());
    }

    #[test]
    fn test_chunk_failure_message() {
        let err = Error::ChunkCallFailed {
            chunk_index: 3,
            attempts: 3,
            source: AnalyzerError::Service {
                status: 503,
                message: "busy".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "chunk 3 failed after 3 attempt(s): service error (503): busy"
        );
    }

    #[test]
    fn test_pervasive_change_message() {
        let err = Error::DiffAmbiguous {
            changed_share: 72.5,
        };
        assert_eq!(
            err.to_string(),
            "changed segments cover 72.5% of the document; too pervasive to reconcile"
        );
    }
}
