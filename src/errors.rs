//! Typed error hierarchy for the braid core.
//!
//! Two top-level enums cover the two services:
//! - `ContextError` — context assembly failures
//! - `SummarizeError` — summarization failures
//!
//! Two outcomes are deliberately NOT errors: losing the optimistic-lock race
//! and running without a configured provider both surface as `Ok(None)` from
//! the summarization service, and background-trigger failures are caught and
//! logged rather than propagated.

use thiserror::Error;

use crate::generate::GenerateError;

/// Errors from the context builder (a pure read path; never retried).
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Branch {id} not found")]
    BranchNotFound { id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the summarization service.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("Branch {id} not found")]
    BranchNotFound { id: String },

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Generation failed: {0}")]
    Generation(#[source] GenerateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_error_not_found_carries_id() {
        let err = ContextError::BranchNotFound { id: "b-42".into() };
        match &err {
            ContextError::BranchNotFound { id } => assert_eq!(id, "b-42"),
            _ => panic!("Expected BranchNotFound"),
        }
        assert!(err.to_string().contains("b-42"));
    }

    #[test]
    fn summarize_error_wraps_generation_failure() {
        let err = SummarizeError::Generation(GenerateError::Api {
            status: 500,
            body: "boom".into(),
        });
        assert!(matches!(err, SummarizeError::Generation(_)));
        assert!(err.to_string().contains("Generation failed"));
    }

    #[test]
    fn errors_convert_from_anyhow() {
        let err: ContextError = anyhow::anyhow!("db exploded").into();
        assert!(matches!(err, ContextError::Other(_)));
        let err: SummarizeError = anyhow::anyhow!("db exploded").into();
        assert!(matches!(err, SummarizeError::Other(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ContextError::BranchNotFound { id: "x".into() });
        assert_std_error(&SummarizeError::ProjectNotFound { id: "x".into() });
    }
}
