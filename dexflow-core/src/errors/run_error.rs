//! Run-level errors and non-fatal error collection.

use super::error_code::{self, DexflowErrorCode};
use super::{
    AnalysisError, ConfigError, ModelValidationError, OutputError, RegistryError,
};

/// Errors that can occur during a full analysis run.
/// Aggregates subsystem errors via `From` conversions.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model validation error: {0}")]
    ModelValidation(#[from] ModelValidationError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Run cancelled")]
    Cancelled,
}

impl DexflowErrorCode for RunError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::ModelValidation(e) => e.error_code(),
            Self::Analysis(e) => e.error_code(),
            Self::Registry(e) => e.error_code(),
            Self::Output(e) => e.error_code(),
            Self::Cancelled => error_code::CANCELLED,
        }
    }
}

/// Result of a run that accumulates non-fatal errors.
/// Allows partial results to be returned even when some entries fail.
#[derive(Debug, Default)]
pub struct RunResult<T: Default = ()> {
    /// The successful result data.
    pub data: T,
    /// Non-fatal errors collected during the run.
    pub errors: Vec<RunError>,
}

impl<T: Default> RunResult<T> {
    /// Create a new empty run result.
    pub fn new(data: T) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    /// Add a non-fatal error to the result.
    pub fn add_error(&mut self, error: RunError) {
        self.errors.push(error);
    }

    /// Returns true if there are no non-fatal errors.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of non-fatal errors.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}
