//! Analysis options.
//!
//! A run is driven by a single options JSON document naming the model,
//! rules and heuristics inputs plus the output directory and resource
//! caps. No environment variables are consulted beyond standard logging.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// How origins are exported in model JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportOriginsMode {
    /// Export origins on every frame.
    #[default]
    Always,
    /// Export origins only on origin frames.
    OnlyOnOrigins,
}

/// Options for a full analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Program IR input (methods, control-flow graphs, hierarchy).
    pub program: Option<PathBuf>,

    /// Model JSON shard paths or directories.
    pub models_paths: Vec<PathBuf>,

    /// Rules JSON file paths.
    pub rules_paths: Vec<PathBuf>,

    /// Heuristics JSON file path.
    pub heuristics_path: Option<PathBuf>,

    /// Output directory for metadata and model shards.
    pub output_directory: PathBuf,

    /// Number of models written per shard file.
    pub shard_size: usize,

    /// Number of worker threads; `None` uses all available cores.
    pub jobs: Option<usize>,

    /// Run the scheduler sequentially, for deterministic debugging.
    pub sequential: bool,

    /// Skip the taint analysis and only emit declared models.
    pub skip_analysis: bool,

    /// Soft per-method analysis deadline, in seconds.
    pub maximum_method_analysis_time: Option<u64>,

    /// Reject unknown members in model JSON instead of ignoring them.
    pub check_unexpected_members: bool,

    /// How origins are exported in model JSON.
    pub export_origins_mode: ExportOriginsMode,

    /// Prefix identifying android platform classes for the wider
    /// override-join threshold.
    pub android_class_prefix: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            program: None,
            models_paths: Vec::new(),
            rules_paths: Vec::new(),
            heuristics_path: None,
            output_directory: PathBuf::from("dexflow-out"),
            shard_size: 10_000,
            jobs: None,
            sequential: false,
            skip_analysis: false,
            maximum_method_analysis_time: None,
            check_unexpected_members: true,
            export_origins_mode: ExportOriginsMode::default(),
            android_class_prefix: "Landroid/".to_string(),
        }
    }
}

impl Options {
    /// Load options from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
        Self::from_json_str(&content, &path.display().to_string())
    }

    /// Parse options from a JSON string.
    pub fn from_json_str(content: &str, path: &str) -> Result<Self, ConfigError> {
        let options: Options =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        options.validate()?;
        Ok(options)
    }

    /// Validate the option values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_size == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "shard_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if let Some(jobs) = self.jobs {
            if jobs == 0 {
                return Err(ConfigError::ValidationFailed {
                    field: "jobs".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_shard_size() {
        let result = Options::from_json_str(r#"{ "shard_size": 0 }"#, "<test>");
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn rejects_unknown_members() {
        let result = Options::from_json_str(r#"{ "unknown": true }"#, "<test>");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
