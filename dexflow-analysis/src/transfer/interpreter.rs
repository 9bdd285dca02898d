//! Instruction-level transfer functions.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::call::analyze_invoke;
use super::environment::{Environment, RESULT_REGISTER};
use super::memory::{MemoryFactory, MemoryLocationsDomain};
use crate::access::{AccessPath, ParameterPosition, Path, PathElement, Register, Root};
use crate::context::AnalysisContext;
use crate::domains::{
    AbstractDomain, CallInfo, CallKind, ClassInterval, CollapseDepth, ConstantDomain,
    FeatureMayAlwaysSet, Frame, PathTree, Taint, TaintTree, UpdateKind,
};
use crate::ir::{
    FieldRef, Instruction, InstructionEntry, MethodHandle, PositionHandle, Program,
};
use crate::model::{Issue, Model, SetterAccessPath};
use crate::registry::Registry;
use crate::rules::Rules;

/// Everything one method's analysis carries across instructions.
pub struct MethodContext<'a> {
    pub context: &'a AnalysisContext,
    pub program: &'a Program,
    pub registry: &'a Registry,
    pub rules: &'a Rules,
    pub method: MethodHandle,
    pub previous_model: &'a Model,
    pub new_model: Model,
    pub memory: MemoryFactory,
    pub caller_class_interval: ClassInterval,
    /// Seeded parameter taint, subtracted before inferring argument
    /// generations.
    pub parameter_seeds: FxHashMap<ParameterPosition, TaintTree>,
    /// The method body is trivial enough to inline as a getter.
    pub inline_safe: bool,
    /// Same, allowing the single field write of a setter.
    pub inline_safe_with_iput: bool,
}

impl<'a> MethodContext<'a> {
    pub fn widening_features(&self) -> FeatureMayAlwaysSet {
        self.context.always_features(&["via-broadening"])
    }

    pub fn position_of(
        &self,
        entry: &InstructionEntry,
        environment: &Environment,
    ) -> PositionHandle {
        entry
            .position
            .or_else(|| environment.last_position())
            .unwrap_or_else(|| self.context.positions.unknown())
    }
}

/// Apply one instruction to the environment.
pub fn analyze_instruction(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    environment: &mut Environment,
) {
    debug!(method = %context.method.signature(), instruction = ?entry.instruction);
    if let Some(position) = entry.position {
        environment.set_last_position(position);
    }

    match &entry.instruction {
        Instruction::LoadParam { dest } => {
            analyze_load_param(context, entry, *dest, environment);
        }
        Instruction::Move { dest, src } => {
            let locations = environment.memory_locations(*src);
            environment.assign(*dest, locations);
        }
        Instruction::MoveResult { dest } => {
            let locations = environment.memory_locations(RESULT_REGISTER);
            environment.assign(*dest, locations);
            environment.clear_result_register();
        }
        Instruction::Const { dest, .. } => {
            let location = context.memory.make_instruction(entry.id);
            environment.assign_location(*dest, location);
        }
        Instruction::ConstString { value } => {
            let location = context.memory.make_instruction(entry.id);
            context.memory.set_constant(location, value.clone());
            environment.assign_location(RESULT_REGISTER, location);

            let sources = context.registry.literal_sources(value);
            if !sources.is_bottom() {
                let position = context.position_of(entry, environment);
                environment.write_location(
                    &context.memory,
                    location,
                    &Path::new(),
                    TaintTree::from_taint(sources.update_leaf_positions(position)),
                    UpdateKind::Strong,
                );
            }
        }
        Instruction::ConstClass { .. } => {
            let location = context.memory.make_instruction(entry.id);
            environment.assign_location(RESULT_REGISTER, location);
        }
        Instruction::NewInstance { class } => {
            let location = context.memory.make_instruction(entry.id);
            context.memory.set_class(location, class.clone());
            environment.assign_location(RESULT_REGISTER, location);
        }
        Instruction::CheckCast { src, class } => {
            // The cast gets a fresh identity carrying the source's taint.
            let taint = environment.read(&context.memory, *src);
            let location = context.memory.make_instruction(entry.id);
            context.memory.set_class(location, class.clone());
            environment.assign_location(RESULT_REGISTER, location);
            environment.write_location(
                &context.memory,
                location,
                &Path::new(),
                taint,
                UpdateKind::Strong,
            );
        }
        Instruction::IGet { src, field } => {
            analyze_iget(context, *src, field, environment);
        }
        Instruction::IPut {
            value,
            target,
            field,
        } => {
            analyze_iput(context, entry, *value, *target, field, environment);
        }
        Instruction::SGet { field } => {
            let class = context.context.str(&field.class);
            let name = context.context.str(&field.name);
            let location = context.memory.make_static_field(class, name);
            environment.assign_location(RESULT_REGISTER, location);

            let field_handle = context.program.fields.get(&field.class, &field.name);
            let field_model = context.registry.field_model(field_handle);
            if !field_model.sources.is_bottom() {
                environment.write_location(
                    &context.memory,
                    location,
                    &Path::new(),
                    TaintTree::from_taint(field_model.sources),
                    UpdateKind::Weak,
                );
            }
        }
        Instruction::SPut { value, field } => {
            let class = context.context.str(&field.class);
            let name = context.context.str(&field.name);
            let location = context.memory.make_static_field(class, name);
            let taint = environment.read(&context.memory, *value);
            check_field_sinks(context, entry, field, &taint, environment);
            environment.write_location(
                &context.memory,
                location,
                &Path::new(),
                taint,
                UpdateKind::Strong,
            );
        }
        Instruction::AGet { array, .. } => {
            // The array and its elements share one cell.
            let locations = environment.memory_locations(*array);
            environment.assign(RESULT_REGISTER, locations);
        }
        Instruction::APut { value, array, .. } => {
            let taint = environment.read(&context.memory, *value);
            environment.write(
                &context.memory,
                *array,
                &Path::new(),
                taint,
                UpdateKind::Weak,
            );
        }
        Instruction::Invoke { kind, method, args } => {
            analyze_invoke(context, entry, *kind, method, args, environment);
        }
        Instruction::Return { src } => {
            analyze_return(context, entry, *src, environment);
        }
    }
}

fn analyze_load_param(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    dest: Register,
    environment: &mut Environment,
) {
    let Some(position) = environment.last_parameter_loaded() else {
        warn!(method = %context.method.signature(), "failed to deduce the parameter of a load");
        return;
    };
    environment.increment_last_parameter_loaded();

    let location = context.memory.make_parameter(position);
    environment.assign_location(dest, location);

    // Seed the cell: declared parameter sources become origins, and a
    // propagation tracker follows this argument through the body.
    let attach_position = context.position_of(entry, environment);
    let port = AccessPath::from_root(Root::argument(position));
    let declared = context.previous_model.parameter_sources().read(&port);

    let mut seeded = TaintTree::bottom();
    for (path, taint) in declared.elements() {
        let attached = taint.attach_position(attach_position);
        if !attached.is_bottom() {
            seeded.write(&path, attached, UpdateKind::Weak);
        }
    }

    let tracker_depth = CollapseDepth::new(
        context.context.heuristics.k_propagation_max_input_path_size as u32,
    );
    let tracker = Taint::from_frame(
        CallInfo::new(
            None,
            CallKind::Propagation,
            context.context.port(Root::leaf()),
            None,
        ),
        Frame::propagation(
            context.context.kinds.local_argument(position),
            PathTree::from_value(tracker_depth),
        ),
    );
    seeded.write(&Path::new(), tracker, UpdateKind::Weak);

    context.parameter_seeds.insert(position, seeded.clone());
    environment.write_location(
        &context.memory,
        location,
        &Path::new(),
        seeded,
        UpdateKind::Strong,
    );
}

fn analyze_iget(
    context: &mut MethodContext<'_>,
    src: Register,
    field: &FieldRef,
    environment: &mut Environment,
) {
    let name = context.context.str(&field.name);
    let fields = environment
        .memory_locations(src)
        .make_fields(&mut context.memory, name);
    environment.assign(RESULT_REGISTER, fields.clone());

    let field_handle = context.program.fields.get(&field.class, &field.name);
    let field_model = context.registry.field_model(field_handle);
    if !field_model.sources.is_bottom() {
        for location in fields.iter() {
            environment.write_location(
                &context.memory,
                location,
                &Path::new(),
                TaintTree::from_taint(field_model.sources.clone()),
                UpdateKind::Weak,
            );
        }
    }
}

fn analyze_iput(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    value: Register,
    target: Register,
    field: &FieldRef,
    environment: &mut Environment,
) {
    // Setter inlining tracks the first (and only) field write.
    if environment.field_write().is_bottom() {
        environment.set_field_write(infer_field_write(context, value, target, field, environment));
    } else {
        environment.set_field_write(ConstantDomain::Top);
    }

    let mut taint = environment.read(&context.memory, value);
    check_field_sinks(context, entry, field, &taint, environment);

    let name = context.context.str(&field.name);
    let field_locations = environment
        .memory_locations(target)
        .make_fields(&mut context.memory, name);
    if is_inner_class_this(context, &environment.memory_locations(target)) {
        taint.add_locally_inferred_features(
            &context.context.always_features(&["via-inner-class-this"]),
        );
    }

    let kind = if field_locations.singleton().is_some() {
        UpdateKind::Strong
    } else {
        UpdateKind::Weak
    };
    for location in field_locations.iter() {
        environment.write_location(
            &context.memory,
            location,
            &Path::new(),
            taint.clone(),
            kind,
        );
    }
}

fn infer_field_write(
    context: &mut MethodContext<'_>,
    value: Register,
    target: Register,
    field: &FieldRef,
    environment: &Environment,
) -> ConstantDomain<SetterAccessPath> {
    let Some(value_location) = environment.memory_locations(value).singleton() else {
        return ConstantDomain::Top;
    };
    let Some(value_path) = context.memory.access_path(value_location) else {
        return ConstantDomain::Top;
    };
    let Some(target_location) = environment.memory_locations(target).singleton() else {
        return ConstantDomain::Top;
    };
    let Some(mut target_path) = context.memory.access_path(target_location) else {
        return ConstantDomain::Top;
    };
    target_path.append(PathElement::field(context.context.str(&field.name)));
    ConstantDomain::Value(SetterAccessPath {
        target: target_path,
        value: value_path,
    })
}

/// Whether any location reaches through the synthetic outer-class
/// reference of an inner class.
pub fn is_inner_class_this(
    context: &MethodContext<'_>,
    locations: &MemoryLocationsDomain,
) -> bool {
    locations.iter().any(|location| {
        let mut current = Some(location);
        while let Some(id) = current {
            if let (Some(parent), Some(field)) =
                (context.memory.parent(id), context.memory.field_name(id))
            {
                if context.memory.is_this_parameter(parent)
                    && context.context.strings.resolve(&field) == "this$0"
                {
                    return true;
                }
                current = Some(parent);
            } else {
                current = None;
            }
        }
        false
    })
}

fn check_field_sinks(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    field: &FieldRef,
    taint: &TaintTree,
    environment: &Environment,
) {
    let field_handle = context.program.fields.get(&field.class, &field.name);
    let field_model = context.registry.field_model(field_handle);
    if field_model.sinks.is_bottom() {
        return;
    }
    let position = context.position_of(entry, environment);
    let source_taint = taint.collapse(&FeatureMayAlwaysSet::empty());
    super::call::check_sources_against_sinks(
        context,
        &source_taint,
        &field_model.sinks,
        &field_handle.signature(),
        Root::leaf().encode(),
        position,
    );
}

fn analyze_return(
    context: &mut MethodContext<'_>,
    entry: &InstructionEntry,
    src: Option<Register>,
    environment: &mut Environment,
) {
    let position = context.position_of(entry, environment);
    let widening = context.widening_features();

    if let Some(src) = src {
        let tree = environment.read(&context.memory, src);
        for (path, taint) in tree.elements() {
            let (plain, propagations) = taint.partition_propagations();
            if !plain.is_bottom() {
                context.new_model.add_inferred_generations(
                    AccessPath::new(Root::return_value(), path.clone()),
                    plain.update_leaf_positions(position),
                    &widening,
                    context.context,
                );
            }
            infer_propagations(context, &propagations, Root::return_value(), &path);
        }

        // Getter inlining: a trivial body returning a parameter path.
        let getter = if context.inline_safe {
            environment
                .memory_locations(src)
                .singleton()
                .and_then(|location| context.memory.access_path(location))
                .map(ConstantDomain::Value)
                .unwrap_or(ConstantDomain::Top)
        } else {
            ConstantDomain::Top
        };
        let mut joined = context.new_model.inline_as_getter().clone();
        joined.join_with(getter);
        context.new_model.set_inline_as_getter(joined);
        context.new_model.set_inline_as_setter(ConstantDomain::Top);
    } else {
        let setter = if context.inline_safe_with_iput {
            environment.field_write().clone()
        } else {
            ConstantDomain::Top
        };
        let mut joined = context.new_model.inline_as_setter().clone();
        joined.join_with(setter);
        context.new_model.set_inline_as_setter(joined);
        context.new_model.set_inline_as_getter(ConstantDomain::Top);
    }

    // Argument mutations become generations and argument-to-argument
    // propagations.
    for parameter in 0..context.method.number_of_parameters() {
        let location = context.memory.make_parameter(parameter);
        let (root, _) = context.memory.root_and_path(location);
        let Some(tree) = environment.tree_at(root) else {
            continue;
        };
        let seed = context.parameter_seeds.get(&parameter).cloned();
        for (path, taint) in tree.elements() {
            let (mut plain, propagations) = taint.partition_propagations();
            if let Some(seed) = &seed {
                plain.difference_with(seed.read(&path).root_taint());
            }
            if !plain.is_bottom() {
                context.new_model.add_inferred_generations(
                    AccessPath::new(Root::argument(parameter), path.clone()),
                    plain.update_leaf_positions(position),
                    &widening,
                    context.context,
                );
            }
            infer_propagations(context, &propagations, Root::argument(parameter), &path);
        }
    }
}

/// Record `input → output` propagations for every tracker frame in the
/// taint.
pub fn infer_propagations(
    context: &mut MethodContext<'_>,
    taint: &Taint,
    output_root: Root,
    output_path: &Path,
) {
    let widening = context.widening_features();
    let mut inferred: Vec<(AccessPath, Taint)> = Vec::new();

    taint.visit_frames(|_, frame| {
        let Some(kind) = frame.kind() else {
            return;
        };
        let Some(input_root) = kind.discard_transforms().propagation_root() else {
            return;
        };
        if !input_root.is_argument() {
            return;
        }
        let output_kind = if output_root.is_return() {
            context.context.kinds.local_return()
        } else {
            context
                .context
                .kinds
                .local_argument(output_root.parameter_position())
        };
        for (suffix, depth) in frame.output_paths().elements() {
            if input_root == output_root && suffix == *output_path {
                continue; // The identity flow of the tracker itself.
            }
            let mut output_paths = PathTree::bottom();
            output_paths.write(output_path, *depth, UpdateKind::Weak);
            let propagation = Frame::propagation(output_kind, output_paths);
            let mut taint = Taint::from_frame(
                CallInfo::new(
                    None,
                    CallKind::Propagation,
                    context.context.port(Root::leaf()),
                    None,
                ),
                propagation,
            );
            // Features picked up along the flow ride as locally inferred
            // features, never on the declaration-like frame itself.
            taint.add_locally_inferred_features(&frame.features());
            inferred.push((AccessPath::new(input_root, suffix), taint));
        }
    });

    for (input, taint) in inferred {
        context
            .new_model
            .add_inferred_propagations(input, taint, &widening, context.context);
    }
}

/// Build an issue when source taint meets sink taint under a rule; the
/// shared helper of call sites and field sinks.
pub fn record_issue(
    context: &mut MethodContext<'_>,
    rule_code: i32,
    sources: Taint,
    sinks: Taint,
    callee: &str,
    sink_index: u32,
    position: PositionHandle,
) {
    context.new_model.add_issue(Issue {
        sources,
        sinks,
        rule_code,
        callee: callee.to_string(),
        sink_index,
        position: Some(position),
    });
}
