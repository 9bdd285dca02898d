//! The `analyze` subcommand: the full pipeline.

use std::path::Path;
use std::process::ExitCode;

use tracing::info;

use dexflow_analysis::interprocedural::run_analysis;
use dexflow_analysis::ir::json::load_program;
use dexflow_analysis::output::dump_all;
use dexflow_analysis::rules::Rules;
use dexflow_analysis::{AnalysisContext, Registry};
use dexflow_core::cancellation::CancellationToken;
use dexflow_core::errors::{ConfigError, RunError};
use dexflow_core::{Heuristics, Options};

use crate::exit_codes;

pub fn run(options_path: &Path) -> Result<ExitCode, RunError> {
    let options = Options::load(options_path)?;
    let heuristics = match &options.heuristics_path {
        Some(path) => Heuristics::load(path)?,
        None => Heuristics::default(),
    };
    let context = AnalysisContext::new(options, heuristics);

    let program_path = context.options.program.clone().ok_or_else(|| {
        RunError::Config(ConfigError::ValidationFailed {
            field: "program".to_string(),
            message: "the analyze command requires a program input".to_string(),
        })
    })?;
    info!(program = %program_path.display(), "loading program IR");
    let program = load_program(&program_path, &context.positions)?;

    let rules = Rules::load(&context.options.rules_paths.clone(), &context)?;
    info!(rules = rules.len(), "initialized rules");

    let registry = Registry::load(&context, &program, Vec::new())?;

    let statistics = if context.options.skip_analysis {
        info!("skipping the taint analysis");
        Default::default()
    } else {
        let cancellation = CancellationToken::new();
        run_analysis(&context, &program, &registry, &rules, &cancellation)
    };

    dump_all(&context, &program, &registry, &rules, &statistics)?;

    let issues = registry.issues_size();
    info!(issues, "done");
    Ok(exit_codes::issues_found(issues > 0))
}
