//! The per-method forward fixpoint.

use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use dexflow_core::errors::AnalysisError;

use super::environment::Environment;
use super::interpreter::{analyze_instruction, MethodContext};
use super::memory::MemoryFactory;
use crate::context::AnalysisContext;
use crate::domains::AbstractDomain;
use crate::ir::{BlockId, MethodHandle, Program};
use crate::model::Model;
use crate::registry::Registry;
use crate::rules::Rules;

/// The outcome of analyzing one method.
pub struct MethodAnalysis {
    pub model: Model,
}

/// Run the forward monotone fixpoint over a method's control-flow
/// graph and return its new model.
pub fn analyze_method(
    context: &AnalysisContext,
    program: &Program,
    registry: &Registry,
    rules: &Rules,
    method: MethodHandle,
    deadline: Option<Instant>,
) -> Result<MethodAnalysis, AnalysisError> {
    let previous_model = registry.model(
        method,
        program.methods.code(method).is_some(),
        context,
    );
    if previous_model.skip_analysis() {
        debug!(method = %method.signature(), "skipping analysis");
        return Ok(MethodAnalysis {
            model: previous_model,
        });
    }
    let Some(cfg) = program.methods.code(method) else {
        // Obscure method: the declared model is all we will ever know.
        return Ok(MethodAnalysis {
            model: previous_model,
        });
    };

    let caller_class_interval = program.class_intervals.get(method.class_name());
    let new_model = previous_model.initial_model_for_iteration();
    let mut method_context = MethodContext {
        context,
        program,
        registry,
        rules,
        method,
        previous_model: &previous_model,
        new_model,
        memory: MemoryFactory::new(context.heuristics.k_max_depth_class_properties),
        caller_class_interval,
        parameter_seeds: FxHashMap::default(),
        inline_safe: is_safe_to_inline_body(&previous_model, cfg, false),
        inline_safe_with_iput: is_safe_to_inline_body(&previous_model, cfg, true),
    };

    // Forward fixpoint: per-block input environments, iterated in
    // reverse post order until stable.
    let order = cfg.reverse_post_order();
    let mut entry_environments: FxHashMap<BlockId, Environment> = FxHashMap::default();
    entry_environments.insert(cfg.entry(), Environment::initial());

    let max_iterations = context.heuristics.k_max_number_iterations;
    let mut iteration = 0;
    loop {
        iteration += 1;
        if iteration > max_iterations {
            warn!(
                method = %method.signature(),
                iterations = max_iterations,
                "method fixpoint did not stabilize, widening"
            );
        }
        let mut changed = false;

        for &block_id in &order {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(AnalysisError::Timeout {
                        method: method.signature(),
                        seconds: context
                            .options
                            .maximum_method_analysis_time
                            .unwrap_or_default(),
                    });
                }
            }

            let Some(mut environment) = entry_environments.get(&block_id).cloned() else {
                continue;
            };
            let block = cfg.block(block_id);
            for entry in &block.instructions {
                analyze_instruction(&mut method_context, entry, &mut environment);
            }

            for &successor in &block.successors {
                match entry_environments.get_mut(&successor) {
                    Some(existing) => {
                        if !environment.leq(existing) {
                            if iteration > max_iterations {
                                existing.widen_with(environment.clone());
                            } else {
                                existing.join_with(environment.clone());
                            }
                            changed = true;
                        }
                    }
                    None => {
                        entry_environments.insert(successor, environment.clone());
                        changed = true;
                    }
                }
            }
        }

        if !changed {
            break;
        }
    }

    Ok(MethodAnalysis {
        model: method_context.new_model,
    })
}

/// A body is inline-safe when it is a single block of side-effect-free
/// instructions (allowing the one field write of a setter) and the model
/// carries no global propagation sanitizers or argument features.
fn is_safe_to_inline_body(
    model: &Model,
    cfg: &crate::ir::ControlFlowGraph,
    allow_iput: bool,
) -> bool {
    if model.has_global_propagation_sanitizer() || model.has_add_features_to_arguments() {
        return false;
    }
    if cfg.blocks().len() != 1 {
        // There could be multiple return statements.
        return false;
    }
    let mut iputs = 0;
    for entry in &cfg.block(cfg.entry()).instructions {
        if entry.instruction.is_iput() {
            iputs += 1;
            if !allow_iput || iputs > 1 {
                return false;
            }
        } else if entry.instruction.has_side_effect() {
            return false;
        }
    }
    true
}
