//! Model validation errors.
//!
//! Emitted when a declared model entry is inconsistent with the method it
//! is attached to. The offending entry is dropped; the run continues.

use super::error_code::{self, DexflowErrorCode};

/// Errors raised while validating declared model entries at load time.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelValidationError {
    #[error("Port {port} does not match the arity of `{method}`")]
    PortOutOfRange { method: String, port: String },

    #[error("Generation on void-returning method `{method}`")]
    GenerationOnVoidReturn { method: String },

    #[error("Parameter source on non-argument port {port} of `{method}`")]
    ParameterSourceOnNonArgument { method: String, port: String },

    #[error("Propagation output on non-writable port {port} of `{method}`")]
    InvalidPropagationOutput { method: String, port: String },

    #[error("Setter inline on `{method}` with mismatched target {target}")]
    SetterTargetMismatch { method: String, target: String },

    #[error("Unknown kind `{kind}` in model for `{method}`")]
    UnknownKind { method: String, kind: String },

    #[error("Unexpected member `{member}` in model for `{method}`")]
    UnexpectedMember { method: String, member: String },

    #[error("Malformed model JSON for `{method}`: {message}")]
    MalformedJson { method: String, message: String },
}

impl DexflowErrorCode for ModelValidationError {
    fn error_code(&self) -> &'static str {
        error_code::MODEL_VALIDATION_ERROR
    }
}
