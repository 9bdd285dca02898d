//! DexflowErrorCode trait for structured error reporting.

/// Trait for converting Dexflow errors to stable error codes.
/// Every error enum implements this so that `metadata.json` can carry a
/// structured `errors` array alongside the human-readable messages.
pub trait DexflowErrorCode {
    /// Returns the stable error code string (e.g., "CONFIG_ERROR").
    fn error_code(&self) -> &'static str;

    /// Returns the formatted error string: `[ERROR_CODE] message`.
    fn coded_string(&self) -> String
    where
        Self: std::fmt::Display,
    {
        format!("[{}] {}", self.error_code(), self)
    }
}

// Error code constants.
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const MODEL_VALIDATION_ERROR: &str = "MODEL_VALIDATION_ERROR";
pub const ANALYSIS_ERROR: &str = "ANALYSIS_ERROR";
pub const ANALYSIS_TIMEOUT: &str = "ANALYSIS_TIMEOUT";
pub const REGISTRY_ERROR: &str = "REGISTRY_ERROR";
pub const OUTPUT_ERROR: &str = "OUTPUT_ERROR";
pub const SCHEDULER_ERROR: &str = "SCHEDULER_ERROR";
pub const CANCELLED: &str = "CANCELLED";
