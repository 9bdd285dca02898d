//! Call-site application: composing callee models into the caller.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::environment::{Environment, RESULT_REGISTER};
use super::interpreter::{
    infer_propagations, is_inner_class_this, record_issue, MethodContext,
};
use super::memory::MemoryLocationId;
use crate::access::{AccessPath, Path, Register, Root};
use crate::domains::{
    AbstractDomain, CallClassIntervalContext, FeatureMayAlwaysSet, Taint, TaintTree,
    UpdateKind,
};
use crate::ir::{InstructionEntry, InvokeKind, MethodHandle, PositionHandle};
use crate::kinds::{Kind, TransformDirection};
use crate::model::{CallsiteArgs, Model};

/// The resolved callee of one call site, with its model instantiated in
/// the caller's context.
struct CalleeModel {
    name: String,
    resolved: Option<MethodHandle>,
    model: Option<Model>,
}

pub fn analyze_invoke(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    invoke_kind: InvokeKind,
    signature: &str,
    args: &[Register],
    environment: &mut Environment,
) {
    let position = context.position_of(entry, environment);
    let callee = resolve_callee(context, entry, invoke_kind, signature, args, environment, position);

    let Some(model) = &callee.model else {
        apply_obscure_call(context, &callee, args, environment, entry);
        return;
    };

    // Inline shortcuts replace the call entirely.
    if try_inline_as_getter(context, model, args, environment) {
        debug!(callee = %callee.name, "inlined call as getter");
        return;
    }
    if try_inline_as_setter(context, model, args, environment) {
        debug!(callee = %callee.name, "inlined call as setter");
        environment.assign(RESULT_REGISTER, Default::default());
        return;
    }

    apply_add_features_to_arguments(context, model, args, environment);
    check_call_sinks(context, model, &callee.name, args, environment, position);
    check_call_effects(context, model, &callee.name, position);

    // The call result: a fresh cell, or the receiver itself when the
    // callee aliases its memory location.
    let returns_void = callee
        .resolved
        .map(|method| method.returns_void())
        .unwrap_or(false);
    if returns_void {
        environment.assign(RESULT_REGISTER, Default::default());
    } else {
        let location = result_location(context, entry, model, args, environment);
        environment.assign_location(RESULT_REGISTER, location);
    }

    apply_propagations(context, model, args, environment);
    apply_generations(context, model, args, environment);
}

fn resolve_callee(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    invoke_kind: InvokeKind,
    signature: &str,
    args: &[Register],
    environment: &Environment,
    position: PositionHandle,
) -> CalleeModel {
    let Some(target) = context.program.call_graph.callee(context.method, entry.id) else {
        return CalleeModel {
            name: signature.to_string(),
            resolved: None,
            model: None,
        };
    };
    let Some(base) = target.resolved_base else {
        return CalleeModel {
            name: signature.to_string(),
            resolved: None,
            model: None,
        };
    };

    let source_register_types = source_register_types(base, args);
    let source_constant_arguments = source_constant_arguments(context, args, environment);
    let is_this_call = invoke_kind.is_virtual()
        && args
            .first()
            .and_then(|receiver| environment.memory_locations(*receiver).singleton())
            .is_some_and(|location| context.memory.is_this_parameter(location));

    // The receiver's dynamic class, refined by the allocation site when
    // the receiver register points at a single known cell.
    let receiver_class: Option<String> = if invoke_kind.is_virtual() {
        args.first()
            .and_then(|receiver| environment.memory_locations(*receiver).singleton())
            .and_then(|location| context.memory.class_of(location))
            .map(str::to_string)
            .or_else(|| target.receiver_class.clone())
    } else {
        target.receiver_class.clone()
    };
    let receiver_interval = receiver_class
        .as_deref()
        .map(|class| context.program.class_intervals.get(class))
        .unwrap_or_else(crate::domains::ClassInterval::top);
    let class_interval_context = if invoke_kind.is_virtual() {
        CallClassIntervalContext::new(receiver_interval, is_this_call)
    } else {
        CallClassIntervalContext::default_context()
    };

    let base_model = context.registry.model(
        base,
        context.program.methods.code(base).is_some(),
        context.context,
    );

    // Collect the override models reachable from the receiver's type.
    let mut candidates: Vec<(MethodHandle, Model)> = vec![(base, base_model.clone())];
    if invoke_kind.is_virtual() && !base_model.no_join_virtual_overrides() {
        for &override_method in &target.overrides {
            let override_interval = context
                .program
                .class_intervals
                .get(override_method.class_name());
            if receiver_interval.meet(override_interval).is_bottom() {
                continue; // Unreachable from the receiver's static type.
            }
            candidates.push((
                override_method,
                context.registry.model(
                    override_method,
                    context.program.methods.code(override_method).is_some(),
                    context.context,
                ),
            ));
        }
    }

    if let Some(warn_threshold) = context.context.heuristics.k_warn_override_threshold {
        if candidates.len() > warn_threshold {
            tracing::warn!(
                callee = %base.signature(),
                overrides = candidates.len(),
                "joining a large override set"
            );
        }
    }
    let threshold = if receiver_class
        .as_deref()
        .is_some_and(|class| class.starts_with(&context.context.options.android_class_prefix))
    {
        context.context.heuristics.k_android_join_override_threshold
    } else {
        context.context.heuristics.k_join_override_threshold
    };
    let flatten = candidates.len() > threshold;

    let mut joined: Option<Model> = None;
    for (method, model) in candidates {
        let override_interval = context.program.class_intervals.get(method.class_name());
        let interval_context = if invoke_kind.is_virtual() {
            CallClassIntervalContext::new(
                receiver_interval.meet(override_interval),
                is_this_call,
            )
        } else {
            class_interval_context
        };
        let at_callsite = model.at_callsite(&CallsiteArgs {
            context: context.context,
            callee: method,
            call_position: position,
            source_register_types: &source_register_types,
            source_constant_arguments: &source_constant_arguments,
            class_interval_context: interval_context,
            caller_class_interval: context.caller_class_interval,
        });
        // Override summaries join under the resolved base callee.
        let at_callsite = if method == base {
            at_callsite
        } else {
            at_callsite.instantiate(base)
        };
        match &mut joined {
            Some(joined) => joined.join_with(&at_callsite),
            None => joined = Some(at_callsite),
        }
    }

    let mut model = joined.unwrap_or_else(|| Model::new(Some(base)));
    if flatten {
        // Too many overrides: collapse intervals into one flat summary.
        let features = context.context.always_features(&["via-override-join"]);
        model.collapse_for_override_join(&features);
    }

    CalleeModel {
        name: base.signature(),
        resolved: Some(base),
        model: Some(model),
    }
}

/// The static parameter types of the callee, the approximation used to
/// materialize `via-type-of` features.
fn source_register_types(callee: MethodHandle, args: &[Register]) -> Vec<Option<String>> {
    (0..args.len())
        .map(|position| {
            callee
                .parameter_type(position as u32)
                .map(str::to_string)
        })
        .collect()
}

fn source_constant_arguments(
    context: &MethodContext<'_>,
    args: &[Register],
    environment: &Environment,
) -> Vec<Option<String>> {
    args.iter()
        .map(|register| {
            environment
                .memory_locations(*register)
                .singleton()
                .and_then(|location| context.memory.constant(location))
                .map(str::to_string)
        })
        .collect()
}

/// Whether inlining may replace this call: no taint of its own, no
/// obscure features, no extra propagations beyond the inlined flow.
fn is_safe_to_inline(model: &Model) -> bool {
    model.generations().is_bottom()
        && model.sinks().is_bottom()
        && !model.add_via_obscure_feature()
        && !model.has_add_features_to_arguments()
        && !model.has_global_propagation_sanitizer()
}

/// The memory location of an argument access path, when unambiguous.
fn invoke_parameter_location(
    context: &mut MethodContext<'_>,
    access_path: &AccessPath,
    args: &[Register],
    environment: &Environment,
) -> Option<MemoryLocationId> {
    let position = access_path.root().parameter_position() as usize;
    let register = *args.get(position)?;
    let mut location = environment.memory_locations(register).singleton()?;
    for element in access_path.path().iter() {
        let name = element.name()?;
        location = context.memory.make_field(location, name);
    }
    Some(location)
}

fn try_inline_as_getter(
    context: &mut MethodContext<'_>,
    model: &Model,
    args: &[Register],
    environment: &mut Environment,
) -> bool {
    let Some(access_path) = model.inline_as_getter().value().cloned() else {
        return false;
    };
    if !is_safe_to_inline(model) {
        return false;
    }
    let Some(location) =
        invoke_parameter_location(context, &access_path, args, environment)
    else {
        return false;
    };
    // The call reads that location: alias it instead of copying taint.
    environment.assign_location(RESULT_REGISTER, location);
    true
}

fn try_inline_as_setter(
    context: &mut MethodContext<'_>,
    model: &Model,
    args: &[Register],
    environment: &mut Environment,
) -> bool {
    let Some(setter) = model.inline_as_setter().value().cloned() else {
        return false;
    };
    if !is_safe_to_inline(model) {
        return false;
    }
    let Some(target) = invoke_parameter_location(context, &setter.target, args, environment)
    else {
        return false;
    };
    let value_position = setter.value.root().parameter_position() as usize;
    let Some(value_register) = args.get(value_position) else {
        return false;
    };
    let taint = environment.read_path(&context.memory, *value_register, setter.value.path());
    environment.write_location(
        &context.memory,
        target,
        &Path::new(),
        taint,
        UpdateKind::Strong,
    );
    true
}

fn apply_add_features_to_arguments(
    context: &mut MethodContext<'_>,
    model: &Model,
    args: &[Register],
    environment: &mut Environment,
) {
    if !model.has_add_features_to_arguments() {
        return;
    }
    for (position, register) in args.iter().enumerate() {
        let features = model.add_features_to_arguments(Root::argument(position as u32));
        if features.is_empty() {
            continue;
        }
        let features = FeatureMayAlwaysSet::make_always(features);
        let mut taint = environment.read(&context.memory, *register);
        if taint.is_bottom() {
            continue;
        }
        taint.add_locally_inferred_features(&features);
        environment.write(
            &context.memory,
            *register,
            &Path::new(),
            taint,
            UpdateKind::Weak,
        );
    }
}

/// Check every sink port of the callee against the caller's argument
/// taint: plain taint makes issues, tracker taint makes inferred sinks.
fn check_call_sinks(
    context: &mut MethodContext<'_>,
    model: &Model,
    callee_name: &str,
    args: &[Register],
    environment: &Environment,
    position: PositionHandle,
) {
    let widening = context.widening_features();
    for (port, sink_taint) in model.sinks().elements() {
        if !port.root().is_argument() {
            continue;
        }
        // The caller's own sink sanitizers erase matching sinks.
        let sink_taint = context.previous_model.apply_sanitizers(
            TransformDirection::Backward,
            sink_taint,
            port.root(),
            context.context,
        );
        if sink_taint.is_bottom() {
            continue;
        }
        let position_index = port.root().parameter_position() as usize;
        let Some(register) = args.get(position_index) else {
            continue;
        };
        let argument_taint = environment
            .read_path(&context.memory, *register, port.path())
            .collapse(&FeatureMayAlwaysSet::empty());
        if argument_taint.is_bottom() {
            continue;
        }
        let (plain, trackers) = argument_taint.partition_propagations();

        if !plain.is_bottom() {
            check_sources_against_sinks(
                context,
                &plain.update_leaf_positions(position),
                &sink_taint,
                callee_name,
                port.root().encode(),
                position,
            );
        }

        // Taint coming from our own parameters: the sink becomes part of
        // this method's summary.
        let mut inferred: Vec<(AccessPath, Taint)> = Vec::new();
        trackers.visit_frames(|_, frame| {
            let Some(kind) = frame.kind() else {
                return;
            };
            let Some(input_root) = kind.discard_transforms().propagation_root() else {
                return;
            };
            if !input_root.is_argument() {
                return;
            }
            for (suffix, _) in frame.output_paths().elements() {
                let mut taint = sink_taint.clone();
                taint.add_locally_inferred_features(&frame.features());
                inferred.push((AccessPath::new(input_root, suffix), taint));
            }
        });
        for (input, taint) in inferred {
            context
                .new_model
                .add_inferred_sinks(input, taint, &widening, context.context);
        }
    }
}

fn check_call_effects(
    context: &mut MethodContext<'_>,
    model: &Model,
    callee_name: &str,
    position: PositionHandle,
) {
    for (port, sink_taint) in model.call_effect_sinks().elements() {
        let our_sources = context
            .previous_model
            .call_effect_sources()
            .read(&AccessPath::from_root(Root::call_effect()))
            .collapse(&FeatureMayAlwaysSet::empty());
        if !our_sources.is_bottom() {
            check_sources_against_sinks(
                context,
                &our_sources.update_leaf_positions(position),
                &sink_taint,
                callee_name,
                port.root().encode(),
                position,
            );
        }
        // Chain the call-effect sink up to our own callers.
        context
            .new_model
            .add_inferred_call_effect_sinks(port, sink_taint);
    }
}

fn result_location(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    model: &Model,
    args: &[Register],
    environment: &Environment,
) -> MemoryLocationId {
    if model.alias_memory_location_on_invoke() {
        if let Some(receiver) = args.first() {
            if let Some(location) = environment.memory_locations(*receiver).singleton() {
                return location;
            }
        }
    }
    context.memory.make_instruction(entry.id)
}

/// Apply the callee's propagations: move input-port taint to output
/// ports through the declared output paths.
fn apply_propagations(
    context: &mut MethodContext<'_>,
    model: &Model,
    args: &[Register],
    environment: &mut Environment,
) {
    let broadening = context.widening_features();
    let no_collapse = model.no_collapse_on_propagation();
    let strong_write = model.strong_write_on_propagation();

    for (input_path, propagation_taint) in model.propagations().elements() {
        if !input_path.root().is_argument() {
            continue;
        }
        let input_position = input_path.root().parameter_position() as usize;
        let Some(input_register) = args.get(input_position) else {
            continue;
        };
        let input_tree =
            environment.read_path(&context.memory, *input_register, input_path.path());
        if input_tree.is_bottom() {
            continue;
        }

        struct Write {
            output_root: Root,
            output_suffix: Path,
            tree: TaintTree,
            strong: bool,
        }
        let mut writes: Vec<Write> = Vec::new();

        propagation_taint.visit_frames(|_, frame| {
            let Some(kind) = frame.kind() else {
                return;
            };
            let Some(output_root) = kind.discard_transforms().propagation_root() else {
                return;
            };

            // Transform wrappers on the propagation apply to the taint
            // moved through it.
            let mut moved = input_tree.clone();
            if let Kind::Transform {
                local_transforms,
                global_transforms,
                ..
            } = &*kind
            {
                let transforms = context
                    .context
                    .transforms
                    .concat(*local_transforms, *global_transforms);
                if let Some(transforms) = transforms {
                    moved.map_taint(|taint| {
                        *taint = taint.apply_transform(
                            transforms,
                            TransformDirection::Forward,
                            &context.context.kinds,
                            &context.context.transforms,
                        );
                    });
                }
            }
            if moved.is_bottom() {
                return;
            }
            moved.add_locally_inferred_features(&frame.features());

            for (output_suffix, collapse_depth) in frame.output_paths().elements() {
                let mut tree = moved.clone();
                if !no_collapse && collapse_depth.should_collapse() {
                    let depth = collapse_depth.value().unwrap_or(0) as usize;
                    if depth == 0 {
                        tree = TaintTree::from_taint(tree.collapse(&broadening));
                    } else if tree.depth() > depth {
                        tree.collapse_deeper_than(depth, &broadening);
                    }
                }
                writes.push(Write {
                    output_root,
                    output_suffix,
                    tree,
                    strong: strong_write,
                });
            }
        });

        for write in writes {
            let kind = if write.strong {
                UpdateKind::Strong
            } else {
                UpdateKind::Weak
            };
            if write.output_root.is_return() {
                let locations = environment.memory_locations(RESULT_REGISTER);
                if let Some(location) = locations.singleton() {
                    environment.write_location(
                        &context.memory,
                        location,
                        &write.output_suffix,
                        write.tree,
                        kind,
                    );
                }
            } else if write.output_root.is_argument() {
                let output_position = write.output_root.parameter_position() as usize;
                if let Some(register) = args.get(output_position) {
                    if is_inner_class_this(context, &environment.memory_locations(*register))
                    {
                        let mut tree = write.tree.clone();
                        tree.add_locally_inferred_features(
                            &context.context.always_features(&["via-inner-class-this"]),
                        );
                        environment.write(
                            &context.memory,
                            *register,
                            &write.output_suffix,
                            tree,
                            kind,
                        );
                    } else {
                        environment.write(
                            &context.memory,
                            *register,
                            &write.output_suffix,
                            write.tree,
                            kind,
                        );
                    }
                }
            }
        }
    }
}

/// Write the callee's generations into the caller's environment.
fn apply_generations(
    context: &mut MethodContext<'_>,
    model: &Model,
    args: &[Register],
    environment: &mut Environment,
) {
    for (port, taint) in model.generations().elements() {
        // The caller's own sanitizers erase matching sources before they
        // ever enter the environment.
        let taint = context.previous_model.apply_sanitizers(
            TransformDirection::Forward,
            taint,
            port.root(),
            context.context,
        );
        if taint.is_bottom() {
            continue;
        }
        if port.root().is_return() {
            let locations = environment.memory_locations(RESULT_REGISTER);
            if let Some(location) = locations.singleton() {
                environment.write_location(
                    &context.memory,
                    location,
                    port.path(),
                    TaintTree::from_taint(taint),
                    UpdateKind::Weak,
                );
            }
        } else if port.root().is_argument() {
            let position = port.root().parameter_position() as usize;
            if let Some(register) = args.get(position) {
                environment.write(
                    &context.memory,
                    *register,
                    port.path(),
                    TaintTree::from_taint(taint),
                    UpdateKind::Weak,
                );
            }
        }
    }
}

/// Taint-in-taint-out for calls that could not be resolved at all.
fn apply_obscure_call(
    context: &mut MethodContext<'_>,
    callee: &CalleeModel,
    args: &[Register],
    environment: &mut Environment,
    entry: &InstructionEntry,
) {
    debug!(callee = %callee.name, "unresolved call treated as obscure");
    let mut joined = TaintTree::bottom();
    for register in args {
        joined.join_with(environment.read(&context.memory, *register));
    }
    let location = context.memory.make_instruction(entry.id);
    environment.assign_location(RESULT_REGISTER, location);
    if joined.is_bottom() {
        return;
    }
    joined = TaintTree::from_taint(
        joined.collapse(&context.context.always_features(&["via-obscure"])),
    );
    environment.write_location(
        &context.memory,
        location,
        &Path::new(),
        joined.clone(),
        UpdateKind::Strong,
    );

    // Trackers flowing into an obscure result still chain propagations.
    let (_, trackers) = joined
        .collapse(&FeatureMayAlwaysSet::empty())
        .partition_propagations();
    infer_propagations(context, &trackers, Root::return_value(), &Path::new());
}

/// Match source kinds against sink kinds under every rule and record
/// the resulting issues.
pub fn check_sources_against_sinks(
    context: &mut MethodContext<'_>,
    sources: &Taint,
    sinks: &Taint,
    callee_name: &str,
    sink_index: u32,
    position: PositionHandle,
) {
    let mut matched: FxHashMap<i32, (FxHashSet<_>, FxHashSet<_>)> = FxHashMap::default();
    for source_kind in sources.kinds() {
        for sink_kind in sinks.kinds() {
            for rule in context.rules.matching(source_kind, sink_kind) {
                let entry = matched.entry(rule.code).or_default();
                entry.0.insert(source_kind);
                entry.1.insert(sink_kind);
            }
        }
    }

    let mut codes: Vec<i32> = matched.keys().copied().collect();
    codes.sort_unstable();
    for code in codes {
        let (source_kinds, sink_kinds) = &matched[&code];
        let mut issue_sources = sources.clone();
        issue_sources.filter_invalid_frames(|_, _, kind| source_kinds.contains(&kind));
        let mut issue_sinks = sinks.clone();
        issue_sinks.filter_invalid_frames(|_, _, kind| sink_kinds.contains(&kind));
        record_issue(
            context,
            code,
            issue_sources,
            issue_sinks,
            callee_name,
            sink_index,
            position,
        );
    }
}
