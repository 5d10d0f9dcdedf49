//! Crate-wide error taxonomy
//!
//! One enum covers the whole core. Policy:
//! - Numeric kernels validate inputs and fail fast; they never catch.
//! - The trainer converts kernel errors into a trace entry and keeps partials.
//! - Fusion isolates per-branch failures; a query always returns an envelope.

use thiserror::Error;

/// Errors produced anywhere in the core
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Shape, range, or enum violation in caller-provided input
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Operation requires a prior lifecycle state
    #[error("Not ready: expected state {expected}, found {actual}")]
    NotReady { expected: String, actual: String },

    /// Vector length differs from the configured embedding dimension
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A branch or external source exceeded its deadline
    #[error("Timed out: {what}")]
    TimedOut { what: String },

    /// External source refused the request due to rate limiting
    #[error("Rate limited by source: {source_name}")]
    RateLimited { source_name: String },

    /// External source returned a failure
    #[error("Upstream failure from {source_name}: {message}")]
    UpstreamFailure { source_name: String, message: String },

    /// Training was stopped by the caller; the partial map remains queryable
    #[error("Cancelled")]
    Cancelled,

    /// A declared but unimplemented code path
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Unexpected internal failure, propagated with source context
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Crate result type
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// True for failures that fusion may recover from by continuing with the
    /// other branch (per-source/per-branch faults, not caller mistakes).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::TimedOut { .. }
                | CoreError::RateLimited { .. }
                | CoreError::UpstreamFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = CoreError::DimensionMismatch {
            expected: 768,
            got: 512,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 768, got 512");

        let err = CoreError::NotReady {
            expected: "DataLoaded".into(),
            actual: "Created".into(),
        };
        assert!(err.to_string().contains("DataLoaded"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(CoreError::TimedOut {
            what: "wikipedia".into()
        }
        .is_recoverable());
        assert!(CoreError::RateLimited {
            source_name: "wikidata".into()
        }
        .is_recoverable());
        assert!(!CoreError::Cancelled.is_recoverable());
        assert!(!CoreError::BadInput("zoom".into()).is_recoverable());
    }
}
