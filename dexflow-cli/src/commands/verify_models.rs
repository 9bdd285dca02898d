//! The `verify-models` subcommand: load model JSON and report
//! validation errors without running the analysis.

use std::path::Path;
use std::process::ExitCode;

use tracing::info;

use dexflow_analysis::ir::json::load_program;
use dexflow_analysis::{AnalysisContext, Registry};
use dexflow_core::errors::{ConfigError, RunError};
use dexflow_core::{Heuristics, Options};

use crate::exit_codes;

pub fn run(options_path: &Path) -> Result<ExitCode, RunError> {
    let options = Options::load(options_path)?;
    let context = AnalysisContext::new(options, Heuristics::default());

    let program_path = context.options.program.clone().ok_or_else(|| {
        RunError::Config(ConfigError::ValidationFailed {
            field: "program".to_string(),
            message: "verify-models requires a program input".to_string(),
        })
    })?;
    let program = load_program(&program_path, &context.positions)?;

    let registry = Registry::load(&context, &program, Vec::new())?;
    let errors = registry.take_errors();
    for error in &errors {
        eprintln!("{error}");
    }
    info!(
        models = registry.models_size(),
        errors = errors.len(),
        "verified models"
    );
    Ok(exit_codes::issues_found(!errors.is_empty()))
}
