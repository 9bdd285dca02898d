//! The `rules` subcommand: list the loaded rules.

use std::path::Path;
use std::process::ExitCode;

use dexflow_analysis::rules::Rules;
use dexflow_analysis::AnalysisContext;
use dexflow_core::errors::RunError;
use dexflow_core::{Heuristics, Options};

use crate::exit_codes;

pub fn run(options_path: &Path) -> Result<ExitCode, RunError> {
    let options = Options::load(options_path)?;
    let context = AnalysisContext::new(options, Heuristics::default());
    let rules = Rules::load(&context.options.rules_paths.clone(), &context)?;

    for rule in rules.iter() {
        println!("{}: {} - {}", rule.code, rule.name, rule.description);
    }
    Ok(exit_codes::success())
}
