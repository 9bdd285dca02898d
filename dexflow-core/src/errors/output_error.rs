//! Output writer errors.

use super::error_code::{self, DexflowErrorCode};

/// Errors raised while writing analysis outputs.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to create output directory {path}: {message}")]
    DirectoryCreationFailed { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("Failed to serialize {what}: {message}")]
    SerializationFailed { what: String, message: String },
}

impl DexflowErrorCode for OutputError {
    fn error_code(&self) -> &'static str {
        error_code::OUTPUT_ERROR
    }
}
