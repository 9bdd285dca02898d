//! Widening heuristics.
//!
//! Every knob that bounds the size of the abstract state lives here so a
//! run can be tuned from a single JSON document. Unknown members are
//! rejected loudly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Tunable thresholds that keep the analysis state finite.
///
/// The defaults match the values the analyzer ships with; a heuristics
/// JSON file overrides individual fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Heuristics {
    /// Maximum number of virtual-override models joined at a call site
    /// before the join is replaced by a single flattened model.
    pub k_join_override_threshold: usize,

    /// Override-join threshold for android platform classes, which have
    /// much wider override sets.
    pub k_android_join_override_threshold: usize,

    /// Emit a warning when an override set exceeds this size.
    pub k_warn_override_threshold: Option<usize>,

    /// Maximum depth of a generation port path.
    pub k_generation_max_port_size: usize,

    /// Maximum number of leaves in a generation output tree per method.
    pub k_generation_max_output_path_leaves: usize,

    /// Maximum depth of a parameter-source port path.
    pub k_parameter_source_max_port_size: usize,

    /// Maximum number of leaves in a parameter-source tree per method.
    pub k_parameter_source_max_output_path_leaves: usize,

    /// Maximum depth of a sink port path.
    pub k_sink_max_port_size: usize,

    /// Maximum number of leaves in a sink tree per method.
    pub k_sink_max_input_path_leaves: usize,

    /// Maximum depth of a call-effect source port path.
    pub k_call_effect_source_max_port_size: usize,

    /// Maximum number of leaves in a call-effect source tree.
    pub k_call_effect_source_max_output_path_leaves: usize,

    /// Maximum depth of a call-effect sink port path.
    pub k_call_effect_sink_max_port_size: usize,

    /// Maximum number of leaves in a call-effect sink tree.
    pub k_call_effect_sink_max_input_path_leaves: usize,

    /// Maximum number of fixpoint iterations for a strongly connected
    /// component before widening kicks in.
    pub k_max_number_iterations: usize,

    /// Maximum depth of class properties considered when deriving
    /// memory-location access paths.
    pub k_max_depth_class_properties: usize,

    /// Maximum source-to-sink call-chain distance; frames beyond this
    /// are dropped during propagation.
    pub k_max_call_chain_source_sink_distance: u32,

    /// Maximum depth of a propagation input path.
    pub k_propagation_max_input_path_size: usize,

    /// Maximum number of leaves in a propagation output-path tree.
    pub k_propagation_max_input_path_leaves: usize,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            k_join_override_threshold: 40,
            k_android_join_override_threshold: 10,
            k_warn_override_threshold: None,
            k_generation_max_port_size: 4,
            k_generation_max_output_path_leaves: 20,
            k_parameter_source_max_port_size: 4,
            k_parameter_source_max_output_path_leaves: 20,
            k_sink_max_port_size: 4,
            k_sink_max_input_path_leaves: 20,
            k_call_effect_source_max_port_size: 4,
            k_call_effect_source_max_output_path_leaves: 20,
            k_call_effect_sink_max_port_size: 4,
            k_call_effect_sink_max_input_path_leaves: 20,
            k_max_number_iterations: 150,
            k_max_depth_class_properties: 10,
            k_max_call_chain_source_sink_distance: 10,
            k_propagation_max_input_path_size: 4,
            k_propagation_max_input_path_leaves: 4,
        }
    }
}

impl Heuristics {
    /// Load heuristics from a JSON file, starting from the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
        Self::from_json_str(&content, &path.display().to_string())
    }

    /// Parse heuristics from a JSON string. Unknown members fail loudly.
    pub fn from_json_str(content: &str, path: &str) -> Result<Self, ConfigError> {
        let heuristics: Heuristics =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        heuristics.validate()?;
        Ok(heuristics)
    }

    /// Validate the heuristics values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k_max_number_iterations == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "k_max_number_iterations".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.k_max_call_chain_source_sink_distance == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "k_max_call_chain_source_sink_distance".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.k_propagation_max_input_path_leaves == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "k_propagation_max_input_path_leaves".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Heuristics::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_overrides() {
        let heuristics = Heuristics::from_json_str(
            r#"{ "k_join_override_threshold": 5, "k_sink_max_port_size": 2 }"#,
            "<test>",
        )
        .unwrap();
        assert_eq!(heuristics.k_join_override_threshold, 5);
        assert_eq!(heuristics.k_sink_max_port_size, 2);
        // Untouched fields keep their defaults.
        assert_eq!(heuristics.k_max_number_iterations, 150);
    }

    #[test]
    fn rejects_unknown_members() {
        let result =
            Heuristics::from_json_str(r#"{ "k_unknown_knob": 1 }"#, "<test>");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn rejects_zero_iteration_cap() {
        let result = Heuristics::from_json_str(
            r#"{ "k_max_number_iterations": 0 }"#,
            "<test>",
        );
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }
}
