//! The interprocedural scheduler.
//!
//! The call graph is condensed into strongly connected components and
//! processed bottom-up: callees reach their fixpoint before callers
//! run. Methods inside one stratum are analyzed in parallel; a method
//! whose model strictly grows re-queues its dependents within the
//! stratum, round-robin, until the iteration cap triggers widening.

use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{info, warn};

use dexflow_core::cancellation::{Cancellable, CancellationToken};
use dexflow_core::errors::{AnalysisError, DexflowErrorCode};

use crate::access::Root;
use crate::context::AnalysisContext;
use crate::ir::{MethodHandle, Program};
use crate::model::Model;
use crate::registry::Registry;
use crate::rules::Rules;
use crate::transfer::analyze_method;

/// Statistics of one whole-program fixpoint run.
#[derive(Debug, Default, Clone)]
pub struct AnalysisStatistics {
    pub methods_analyzed: usize,
    pub iterations: usize,
    pub strata: usize,
    pub timeouts: usize,
    pub errors: Vec<String>,
}

/// Run the whole-program fixpoint.
pub fn run_analysis(
    context: &AnalysisContext,
    program: &Program,
    registry: &Registry,
    rules: &Rules,
    cancellation: &CancellationToken,
) -> AnalysisStatistics {
    let mut statistics = AnalysisStatistics::default();

    let pool = context.options.jobs.map(|jobs| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .expect("failed to build the worker pool")
    });

    // Condense the call graph; Tarjan returns components in reverse
    // topological order, which for caller→callee edges is callees
    // first: exactly the bottom-up schedule.
    let mut graph: DiGraph<MethodHandle, ()> = DiGraph::new();
    let mut nodes = FxHashMap::default();
    for method in program.methods.iter() {
        nodes.insert(method, graph.add_node(method));
    }
    for method in program.methods.iter() {
        for callee in program.call_graph.callees(method) {
            if let Some(&callee_node) = nodes.get(&callee) {
                graph.add_edge(nodes[&method], callee_node, ());
            }
        }
    }
    let strata = tarjan_scc(&graph);
    statistics.strata = strata.len();
    info!(
        methods = program.methods.len(),
        strata = strata.len(),
        "built the analysis schedule"
    );

    for stratum in strata {
        if cancellation.is_cancelled() {
            warn!("analysis cancelled, draining the queue");
            break;
        }

        let members: FxHashSet<MethodHandle> =
            stratum.iter().map(|&node| graph[node]).collect();
        let mut queue: Vec<MethodHandle> = members.iter().copied().collect();
        queue.sort_by_key(|method| method.signature());

        let (sender, receiver) = unbounded::<MethodHandle>();
        for method in queue {
            sender.send(method).expect("queue send");
        }

        let mut round = 0;
        loop {
            let batch: Vec<MethodHandle> = {
                let mut batch: Vec<MethodHandle> =
                    receiver.try_iter().collect::<FxHashSet<_>>().into_iter().collect();
                batch.sort_by_key(|method| method.signature());
                batch
            };
            if batch.is_empty() {
                break;
            }
            round += 1;
            statistics.iterations += 1;

            if cancellation.is_cancelled() {
                break;
            }

            let widen = round > context.heuristics.k_max_number_iterations;
            if round > 2 * context.heuristics.k_max_number_iterations {
                let error = AnalysisError::CycleTooDeep {
                    iterations: round,
                };
                warn!(error = %error, "forcing convergence");
                statistics.errors.push(error.coded_string());
                break;
            }

            let deadline = context
                .options
                .maximum_method_analysis_time
                .map(|seconds| Instant::now() + Duration::from_secs(seconds));

            let analyze_batch = || {
                batch
                    .par_iter()
                    .map(|&method| {
                        (
                            method,
                            analyze_method(
                                context, program, registry, rules, method, deadline,
                            )
                            .map(|analysis| analysis.model),
                        )
                    })
                    .collect()
            };
            let results: Vec<(MethodHandle, Result<Model, AnalysisError>)> =
                if context.options.sequential {
                    batch
                        .iter()
                        .map(|&method| {
                            (
                                method,
                                analyze_method(
                                    context, program, registry, rules, method, deadline,
                                )
                                .map(|analysis| analysis.model),
                            )
                        })
                        .collect()
                } else {
                    match &pool {
                        Some(pool) => pool.install(analyze_batch),
                        None => analyze_batch(),
                    }
                };

            for (method, result) in results {
                statistics.methods_analyzed += 1;
                let mut model = match result {
                    Ok(model) => model,
                    Err(error) => {
                        warn!(method = %method.signature(), error = %error,
                              "installing the conservative model");
                        statistics.timeouts += 1;
                        statistics.errors.push(error.coded_string());
                        conservative_model(context, method)
                    }
                };
                if widen {
                    model.approximate(context);
                }
                if registry.join(method, model) {
                    // Strict growth: every caller must observe it.
                    for &dependent in program.dependencies.dependents(method) {
                        if members.contains(&dependent) {
                            sender.send(dependent).expect("queue send");
                        }
                    }
                }
            }
        }
    }

    info!(
        methods = statistics.methods_analyzed,
        issues = registry.issues_size(),
        "analysis fixpoint reached"
    );
    statistics
}

/// The model installed when a method's analysis fails or times out:
/// taint-in-taint-out over the declared model, with an analysis-error
/// marker on every parameter.
fn conservative_model(context: &AnalysisContext, method: MethodHandle) -> Model {
    let mut model = Model::obscure_default(Some(method), context);
    let features = context.feature_set(&["via-analysis-error"]);
    for position in 0..method.number_of_parameters() {
        model.add_add_features_to_arguments(Root::argument(position), features.clone());
    }
    model
}
