//! Registry errors.

use super::error_code::{self, DexflowErrorCode};

/// Errors raised while loading or querying the model registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unresolved method reference `{method}`")]
    UnresolvedMethod { method: String },

    #[error("Unresolved field reference `{field}`")]
    UnresolvedField { field: String },

    #[error("Failed to read model shard {path}: {message}")]
    ShardReadFailed { path: String, message: String },
}

impl DexflowErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        error_code::REGISTRY_ERROR
    }
}
