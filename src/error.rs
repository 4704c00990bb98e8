// src/error.rs: error taxonomy for the evaluation pipeline.
//
// Classifier trouble is an `AnalysisError`; the orchestrator degrades to a
// rules-only (partial) evaluation instead of propagating it. `EvaluationError`
// is the only error a single case can surface to the scan, and the scan
// contains it per case. Adapter seams (store, sink, notifier) stay on
// `anyhow::Result`.

use thiserror::Error;

/// Failure modes of the external text classifier.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The classifier could not be reached, timed out, or kept erroring
    /// through the retry budget.
    #[error("text classifier unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { reason: String, attempts: u32 },

    /// The classifier answered, but the payload did not have the agreed
    /// shape. Treated the same as unavailable downstream.
    #[error("text classifier returned a malformed verdict: {reason}")]
    Malformed { reason: String },
}

impl AnalysisError {
    pub fn unavailable(reason: impl Into<String>, attempts: u32) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            attempts,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Unrecoverable failure of a single case evaluation. The scan counts it
/// and moves on to the next case.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("case evaluation aborted: {reason}")]
    Aborted { reason: String },
}

impl EvaluationError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}
