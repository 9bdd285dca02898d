//! Per-method analysis errors.

use super::error_code::{self, DexflowErrorCode};

/// Errors raised while analyzing a single method.
///
/// These never fail the whole run: the method's model is replaced with
/// the conservative default and the error is logged and collected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analysis of `{method}` timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    #[error("Transfer function failed in `{method}`: {message}")]
    TransferFailed { method: String, message: String },

    #[error("Unresolved callee `{callee}` in `{method}`")]
    UnresolvedCallee { method: String, callee: String },

    #[error("Strongly connected component did not converge after {iterations} iterations")]
    CycleTooDeep { iterations: usize },
}

impl DexflowErrorCode for AnalysisError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => error_code::ANALYSIS_TIMEOUT,
            Self::CycleTooDeep { .. } => error_code::SCHEDULER_ERROR,
            _ => error_code::ANALYSIS_ERROR,
        }
    }
}
