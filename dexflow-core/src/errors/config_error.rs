//! Configuration errors.

use super::error_code::{self, DexflowErrorCode};

/// Errors that can occur while loading options or heuristics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Unexpected member `{member}` in {path}")]
    UnexpectedMember { path: String, member: String },

    #[error("Invalid value for `{field}`: {message}")]
    ValidationFailed { field: String, message: String },
}

impl DexflowErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        error_code::CONFIG_ERROR
    }
}
