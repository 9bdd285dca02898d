//! `Model`: the per-method taint summary.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use dexflow_core::errors::ModelValidationError;

use super::issue::{Issue, IssueSet};
use super::taint_config::{PropagationConfig, Sanitizer, SanitizerSet, TaintConfig};
use crate::access::{AccessPath, AccessPathHandle, Root};
use crate::context::AnalysisContext;
use crate::domains::{
    AbstractDomain, CallClassIntervalContext, CallSiteContext, ClassInterval,
    ConstantDomain, FeatureMayAlwaysSet, FeatureSet, Taint, TaintAccessPathTree,
    UpdateKind,
};
use crate::ir::{MethodHandle, PositionHandle};
use crate::kinds::{KindHandle, SanitizerKind, TransformDirection};

/// A specific behavior of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Mode {
    /// Skip the analysis of this method.
    SkipAnalysis = 1 << 0,
    /// Add the `via-obscure` feature to taint flowing through.
    AddViaObscureFeature = 1 << 1,
    /// Taint on arguments flows into the return value.
    TaintInTaintOut = 1 << 2,
    /// Taint on arguments flows into the receiver.
    TaintInTaintThis = 1 << 3,
    /// Do not join all overrides at virtual call sites.
    NoJoinVirtualOverrides = 1 << 4,
    /// Do not collapse input paths when applying propagations.
    NoCollapseOnPropagation = 1 << 5,
    /// Alias the receiver's memory location on invokes.
    AliasMemoryLocationOnInvoke = 1 << 6,
    /// Perform a strong write when applying propagations.
    StrongWriteOnPropagation = 1 << 7,
}

pub const ALL_MODES: [Mode; 8] = [
    Mode::SkipAnalysis,
    Mode::AddViaObscureFeature,
    Mode::TaintInTaintOut,
    Mode::TaintInTaintThis,
    Mode::NoJoinVirtualOverrides,
    Mode::NoCollapseOnPropagation,
    Mode::AliasMemoryLocationOnInvoke,
    Mode::StrongWriteOnPropagation,
];

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::SkipAnalysis => "skip-analysis",
            Mode::AddViaObscureFeature => "add-via-obscure-feature",
            Mode::TaintInTaintOut => "taint-in-taint-out",
            Mode::TaintInTaintThis => "taint-in-taint-this",
            Mode::NoJoinVirtualOverrides => "no-join-virtual-overrides",
            Mode::NoCollapseOnPropagation => "no-collapse-on-propagation",
            Mode::AliasMemoryLocationOnInvoke => "alias-memory-location-on-invoke",
            Mode::StrongWriteOnPropagation => "strong-write-on-propagation",
        }
    }

    pub fn from_name(name: &str) -> Option<Mode> {
        ALL_MODES.into_iter().find(|mode| mode.name() == name)
    }
}

/// A bit set of modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modes(u16);

impl Modes {
    pub fn empty() -> Self {
        Modes(0)
    }

    pub fn contains(self, mode: Mode) -> bool {
        self.0 & (mode as u16) != 0
    }

    pub fn insert(&mut self, mode: Mode) {
        self.0 |= mode as u16;
    }

    pub fn union_with(&mut self, other: Modes) {
        self.0 |= other.0;
    }

    pub fn is_subset(self, other: Modes) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Mode> {
        ALL_MODES.into_iter().filter(move |&mode| self.contains(mode))
    }
}

impl FromIterator<Mode> for Modes {
    fn from_iter<I: IntoIterator<Item = Mode>>(iter: I) -> Self {
        let mut modes = Modes::empty();
        for mode in iter {
            modes.insert(mode);
        }
        modes
    }
}

/// Taint trees of a model that can be frozen against further joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FreezeKind {
    Generations = 1 << 0,
    ParameterSources = 1 << 1,
    Sinks = 1 << 2,
    Propagations = 1 << 3,
}

pub const ALL_FREEZE_KINDS: [FreezeKind; 4] = [
    FreezeKind::Generations,
    FreezeKind::ParameterSources,
    FreezeKind::Sinks,
    FreezeKind::Propagations,
];

impl FreezeKind {
    pub fn name(self) -> &'static str {
        match self {
            FreezeKind::Generations => "generations",
            FreezeKind::ParameterSources => "parameter_sources",
            FreezeKind::Sinks => "sinks",
            FreezeKind::Propagations => "propagation",
        }
    }

    pub fn from_name(name: &str) -> Option<FreezeKind> {
        ALL_FREEZE_KINDS
            .into_iter()
            .find(|kind| kind.name() == name)
    }
}

/// A bit set of freeze kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frozen(u8);

impl Frozen {
    pub fn empty() -> Self {
        Frozen(0)
    }

    pub fn contains(self, kind: FreezeKind) -> bool {
        self.0 & (kind as u8) != 0
    }

    pub fn insert(&mut self, kind: FreezeKind) {
        self.0 |= kind as u8;
    }

    pub fn union_with(&mut self, other: Frozen) {
        self.0 |= other.0;
    }

    pub fn iter(self) -> impl Iterator<Item = FreezeKind> {
        ALL_FREEZE_KINDS
            .into_iter()
            .filter(move |&kind| self.contains(kind))
    }
}

/// The target and value access paths of an inferred setter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetterAccessPath {
    pub target: AccessPath,
    pub value: AccessPath,
}

/// A summary of what we know about a method.
///
/// A *generation* taints an output regardless of input taint; a
/// *parameter source* declares an input tainted; a *sink* names a port
/// reaching danger; a *propagation* carries taint from an input port to
/// an output port. Global and port sanitizers erase matching kinds in
/// flight. `inline_as_getter`/`inline_as_setter` replace trivial calls
/// with direct memory reads/writes at call sites.
#[derive(Debug, Clone)]
pub struct Model {
    method: Option<MethodHandle>,
    modes: Modes,
    frozen: Frozen,
    generations: TaintAccessPathTree,
    parameter_sources: TaintAccessPathTree,
    sinks: TaintAccessPathTree,
    call_effect_sources: TaintAccessPathTree,
    call_effect_sinks: TaintAccessPathTree,
    propagations: TaintAccessPathTree,
    global_sanitizers: SanitizerSet,
    port_sanitizers: FxHashMap<Root, SanitizerSet>,
    attach_to_sources: FxHashMap<Root, FeatureSet>,
    attach_to_sinks: FxHashMap<Root, FeatureSet>,
    attach_to_propagations: FxHashMap<Root, FeatureSet>,
    add_features_to_arguments: FxHashMap<Root, FeatureSet>,
    inline_as_getter: ConstantDomain<AccessPath>,
    inline_as_setter: ConstantDomain<SetterAccessPath>,
    model_generators: BTreeSet<String>,
    issues: IssueSet,
}

/// Everything a call site supplies to `at_callsite`.
pub struct CallsiteArgs<'a> {
    pub context: &'a AnalysisContext,
    pub callee: MethodHandle,
    pub call_position: PositionHandle,
    pub source_register_types: &'a [Option<String>],
    pub source_constant_arguments: &'a [Option<String>],
    pub class_interval_context: CallClassIntervalContext,
    pub caller_class_interval: ClassInterval,
}

impl Model {
    pub fn new(method: Option<MethodHandle>) -> Self {
        Model {
            method,
            modes: Modes::empty(),
            frozen: Frozen::empty(),
            generations: TaintAccessPathTree::bottom(),
            parameter_sources: TaintAccessPathTree::bottom(),
            sinks: TaintAccessPathTree::bottom(),
            call_effect_sources: TaintAccessPathTree::bottom(),
            call_effect_sinks: TaintAccessPathTree::bottom(),
            propagations: TaintAccessPathTree::bottom(),
            global_sanitizers: SanitizerSet::new(),
            port_sanitizers: FxHashMap::default(),
            attach_to_sources: FxHashMap::default(),
            attach_to_sinks: FxHashMap::default(),
            attach_to_propagations: FxHashMap::default(),
            add_features_to_arguments: FxHashMap::default(),
            inline_as_getter: ConstantDomain::Bottom,
            inline_as_setter: ConstantDomain::Bottom,
            model_generators: BTreeSet::new(),
            issues: IssueSet::new(),
        }
    }

    /// The conservative model for obscure (body-less) methods and for
    /// methods whose analysis failed or timed out.
    pub fn obscure_default(method: Option<MethodHandle>, context: &AnalysisContext) -> Self {
        let mut model = Model::new(method);
        model.add_mode(Mode::AddViaObscureFeature, context);
        model.add_mode(Mode::TaintInTaintOut, context);
        model
    }

    pub fn method(&self) -> Option<MethodHandle> {
        self.method
    }

    /// Attach this model to a method, recording declaration origins.
    pub fn instantiate(&self, method: MethodHandle) -> Model {
        let mut model = self.clone();
        model.method = Some(method);
        model
    }

    // Modes and freezes.

    pub fn add_mode(&mut self, mode: Mode, context: &AnalysisContext) {
        self.modes.insert(mode);
        if matches!(mode, Mode::TaintInTaintOut | Mode::TaintInTaintThis) {
            self.synthesize_taint_in_taint_out(context);
        }
    }

    pub fn modes(&self) -> Modes {
        self.modes
    }

    pub fn skip_analysis(&self) -> bool {
        self.modes.contains(Mode::SkipAnalysis)
    }

    pub fn add_via_obscure_feature(&self) -> bool {
        self.modes.contains(Mode::AddViaObscureFeature)
    }

    pub fn is_taint_in_taint_out(&self) -> bool {
        self.modes.contains(Mode::TaintInTaintOut)
    }

    pub fn is_taint_in_taint_this(&self) -> bool {
        self.modes.contains(Mode::TaintInTaintThis)
    }

    pub fn no_join_virtual_overrides(&self) -> bool {
        self.modes.contains(Mode::NoJoinVirtualOverrides)
    }

    pub fn no_collapse_on_propagation(&self) -> bool {
        self.modes.contains(Mode::NoCollapseOnPropagation)
    }

    pub fn alias_memory_location_on_invoke(&self) -> bool {
        self.modes.contains(Mode::AliasMemoryLocationOnInvoke)
    }

    pub fn strong_write_on_propagation(&self) -> bool {
        self.modes.contains(Mode::StrongWriteOnPropagation)
    }

    pub fn freeze(&mut self, kind: FreezeKind) {
        self.frozen.insert(kind);
    }

    pub fn frozen(&self) -> Frozen {
        self.frozen
    }

    pub fn is_frozen(&self, kind: FreezeKind) -> bool {
        self.frozen.contains(kind)
    }

    /// Taint-in-taint-out: every argument propagates to the return
    /// value, marked obscure. Requires the method to know its arity;
    /// without one, the propagation is added lazily at call sites.
    fn synthesize_taint_in_taint_out(&mut self, context: &AnalysisContext) {
        let Some(method) = self.method else {
            return;
        };
        let features = if self.add_via_obscure_feature() {
            context.feature_set(&["via-obscure"])
        } else {
            FeatureSet::bottom()
        };
        for position in 0..method.number_of_parameters() {
            if self.is_taint_in_taint_out() && !method.returns_void() {
                let config = PropagationConfig::new(
                    AccessPath::from_root(Root::argument(position)),
                    context.kinds.local_return(),
                )
                .with_features(features.clone());
                let _ = self.add_propagation(config, context);
            }
            if self.is_taint_in_taint_this()
                && !method.is_static()
                && position > 0
            {
                let config = PropagationConfig::new(
                    AccessPath::from_root(Root::argument(position)),
                    context.kinds.receiver(),
                )
                .with_features(features.clone());
                let _ = self.add_propagation(config, context);
            }
        }
    }

    // Declared taint.

    pub fn add_generation(
        &mut self,
        port: AccessPath,
        config: TaintConfig,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        self.check_port(&port, context)?;
        if port.root().is_return() {
            if let Some(method) = self.method {
                if method.returns_void() {
                    return Err(ModelValidationError::GenerationOnVoidReturn {
                        method: method.signature(),
                    });
                }
            }
        }
        let mut taint = config.into_taint(context);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, self.intern_port(&port, context));
        }
        self.generations.write(&port, taint, UpdateKind::Weak);
        Ok(())
    }

    pub fn add_parameter_source(
        &mut self,
        port: AccessPath,
        config: TaintConfig,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        self.check_port(&port, context)?;
        if !port.root().is_argument() {
            return Err(ModelValidationError::ParameterSourceOnNonArgument {
                method: self.method_name(),
                port: port.to_string_with(&context.strings),
            });
        }
        let mut taint = config.into_taint(context);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, self.intern_port(&port, context));
        }
        self.parameter_sources.write(&port, taint, UpdateKind::Weak);
        Ok(())
    }

    pub fn add_sink(
        &mut self,
        port: AccessPath,
        config: TaintConfig,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        self.check_port(&port, context)?;
        let mut taint = config.into_taint(context);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, self.intern_port(&port, context));
        }
        self.sinks.write(&port, taint, UpdateKind::Weak);
        Ok(())
    }

    pub fn add_call_effect_source(
        &mut self,
        config: TaintConfig,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        let port = AccessPath::from_root(Root::call_effect());
        let mut taint = config.into_taint(context);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, self.intern_port(&port, context));
        }
        self.call_effect_sources.write(&port, taint, UpdateKind::Weak);
        Ok(())
    }

    pub fn add_call_effect_sink(
        &mut self,
        config: TaintConfig,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        let port = AccessPath::from_root(Root::call_effect());
        let mut taint = config.into_taint(context);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, self.intern_port(&port, context));
        }
        self.call_effect_sinks.write(&port, taint, UpdateKind::Weak);
        Ok(())
    }

    pub fn add_propagation(
        &mut self,
        config: PropagationConfig,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        if !config.input_path.root().is_argument() {
            return Err(ModelValidationError::InvalidPropagationOutput {
                method: self.method_name(),
                port: config.input_path.to_string_with(&context.strings),
            });
        }
        let input_path = config.input_path.clone();
        let taint = config.into_taint(context);
        self.propagations.write(&input_path, taint, UpdateKind::Weak);
        Ok(())
    }

    // Sanitizers and features.

    pub fn add_global_sanitizer(&mut self, sanitizer: Sanitizer) {
        self.global_sanitizers.add(sanitizer);
    }

    pub fn global_sanitizers(&self) -> &SanitizerSet {
        &self.global_sanitizers
    }

    pub fn has_global_propagation_sanitizer(&self) -> bool {
        self.global_sanitizers.has_kind(SanitizerKind::Propagations)
    }

    pub fn add_port_sanitizers(&mut self, root: Root, sanitizers: SanitizerSet) {
        self.port_sanitizers
            .entry(root)
            .or_default()
            .join_with(&sanitizers);
    }

    pub fn add_attach_to_sources(&mut self, root: Root, features: FeatureSet) {
        self.attach_to_sources.entry(root).or_default().union_with(&features);
    }

    pub fn attach_to_sources(&self, root: Root) -> FeatureSet {
        self.attach_to_sources.get(&root).cloned().unwrap_or_default()
    }

    pub fn add_attach_to_sinks(&mut self, root: Root, features: FeatureSet) {
        self.attach_to_sinks.entry(root).or_default().union_with(&features);
    }

    pub fn attach_to_sinks(&self, root: Root) -> FeatureSet {
        self.attach_to_sinks.get(&root).cloned().unwrap_or_default()
    }

    pub fn add_attach_to_propagations(&mut self, root: Root, features: FeatureSet) {
        self.attach_to_propagations
            .entry(root)
            .or_default()
            .union_with(&features);
    }

    pub fn attach_to_propagations(&self, root: Root) -> FeatureSet {
        self.attach_to_propagations
            .get(&root)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_add_features_to_arguments(&mut self, root: Root, features: FeatureSet) {
        self.add_features_to_arguments
            .entry(root)
            .or_default()
            .union_with(&features);
    }

    pub fn has_add_features_to_arguments(&self) -> bool {
        !self.add_features_to_arguments.is_empty()
    }

    pub fn add_features_to_arguments(&self, root: Root) -> FeatureSet {
        self.add_features_to_arguments
            .get(&root)
            .cloned()
            .unwrap_or_default()
    }

    // Inline shortcuts.

    pub fn inline_as_getter(&self) -> &ConstantDomain<AccessPath> {
        &self.inline_as_getter
    }

    pub fn set_inline_as_getter(&mut self, inline_as_getter: ConstantDomain<AccessPath>) {
        self.inline_as_getter = inline_as_getter;
    }

    pub fn inline_as_setter(&self) -> &ConstantDomain<SetterAccessPath> {
        &self.inline_as_setter
    }

    pub fn set_inline_as_setter(
        &mut self,
        inline_as_setter: ConstantDomain<SetterAccessPath>,
    ) {
        self.inline_as_setter = inline_as_setter;
    }

    // Provenance and issues.

    pub fn add_model_generator(&mut self, name: &str) {
        self.model_generators.insert(name.to_string());
    }

    pub fn model_generators(&self) -> &BTreeSet<String> {
        &self.model_generators
    }

    pub fn add_issue(&mut self, issue: Issue) {
        self.issues.add(issue);
    }

    pub fn issues(&self) -> &IssueSet {
        &self.issues
    }

    pub fn set_issues(&mut self, issues: IssueSet) {
        self.issues = issues;
    }

    // Tree accessors.

    pub fn set_generations(&mut self, generations: TaintAccessPathTree) {
        self.generations = generations;
    }

    pub fn set_parameter_sources(&mut self, parameter_sources: TaintAccessPathTree) {
        self.parameter_sources = parameter_sources;
    }

    pub fn set_sinks(&mut self, sinks: TaintAccessPathTree) {
        self.sinks = sinks;
    }

    pub fn set_call_effect_sources(&mut self, call_effect_sources: TaintAccessPathTree) {
        self.call_effect_sources = call_effect_sources;
    }

    pub fn set_call_effect_sinks(&mut self, call_effect_sinks: TaintAccessPathTree) {
        self.call_effect_sinks = call_effect_sinks;
    }

    pub fn set_propagations(&mut self, propagations: TaintAccessPathTree) {
        self.propagations = propagations;
    }

    pub fn generations(&self) -> &TaintAccessPathTree {
        &self.generations
    }

    pub fn parameter_sources(&self) -> &TaintAccessPathTree {
        &self.parameter_sources
    }

    pub fn sinks(&self) -> &TaintAccessPathTree {
        &self.sinks
    }

    pub fn call_effect_sources(&self) -> &TaintAccessPathTree {
        &self.call_effect_sources
    }

    pub fn call_effect_sinks(&self) -> &TaintAccessPathTree {
        &self.call_effect_sinks
    }

    pub fn propagations(&self) -> &TaintAccessPathTree {
        &self.propagations
    }

    pub fn source_kinds(&self) -> rustc_hash::FxHashSet<KindHandle> {
        let mut kinds = rustc_hash::FxHashSet::default();
        for (_, taint) in self.generations.elements() {
            kinds.extend(taint.kinds());
        }
        for (_, taint) in self.parameter_sources.elements() {
            kinds.extend(taint.kinds());
        }
        kinds
    }

    pub fn sink_kinds(&self) -> rustc_hash::FxHashSet<KindHandle> {
        let mut kinds = rustc_hash::FxHashSet::default();
        for (_, taint) in self.sinks.elements() {
            kinds.extend(taint.kinds());
        }
        for (_, taint) in self.call_effect_sinks.elements() {
            kinds.extend(taint.kinds());
        }
        kinds
    }

    pub fn remove_kinds(&mut self, to_remove: &rustc_hash::FxHashSet<KindHandle>) {
        let filter = |taint: &mut Taint| {
            taint.filter_invalid_frames(|_, _, kind| !to_remove.contains(&kind));
        };
        self.generations.map_trees(|tree| tree.map_taint(filter));
        self.parameter_sources.map_trees(|tree| tree.map_taint(filter));
        self.sinks.map_trees(|tree| tree.map_taint(filter));
        self.call_effect_sources.map_trees(|tree| tree.map_taint(filter));
        self.call_effect_sinks.map_trees(|tree| tree.map_taint(filter));
    }

    // Inferred taint, written by the transfer functions.

    /// Add inferred generations, applying sanitizers and the port-size
    /// cap.
    pub fn add_inferred_generations(
        &mut self,
        port: AccessPath,
        taint: Taint,
        widening_features: &FeatureMayAlwaysSet,
        context: &AnalysisContext,
    ) {
        let taint = self.apply_sanitizers(TransformDirection::Forward, taint, port.root(), context);
        if taint.is_bottom() {
            return;
        }
        self.write_truncated(
            TreeKind::Generations,
            port,
            taint,
            context.heuristics.k_generation_max_port_size,
            widening_features,
        );
    }

    pub fn add_inferred_sinks(
        &mut self,
        port: AccessPath,
        taint: Taint,
        widening_features: &FeatureMayAlwaysSet,
        context: &AnalysisContext,
    ) {
        let taint =
            self.apply_sanitizers(TransformDirection::Backward, taint, port.root(), context);
        if taint.is_bottom() {
            return;
        }
        self.write_truncated(
            TreeKind::Sinks,
            port,
            taint,
            context.heuristics.k_sink_max_port_size,
            widening_features,
        );
    }

    pub fn add_inferred_propagations(
        &mut self,
        input_path: AccessPath,
        taint: Taint,
        widening_features: &FeatureMayAlwaysSet,
        context: &AnalysisContext,
    ) {
        if self
            .global_sanitizers
            .iter()
            .any(|sanitizer| sanitizer.sanitizer_kind == SanitizerKind::Propagations && sanitizer.kinds.is_none())
        {
            return;
        }
        self.write_truncated(
            TreeKind::Propagations,
            input_path,
            taint,
            context.heuristics.k_propagation_max_input_path_size,
            widening_features,
        );
    }

    pub fn add_inferred_call_effect_sinks(&mut self, port: AccessPath, taint: Taint) {
        if taint.is_bottom() {
            return;
        }
        self.call_effect_sinks.write(&port, taint, UpdateKind::Weak);
    }

    fn write_truncated(
        &mut self,
        tree: TreeKind,
        mut port: AccessPath,
        mut taint: Taint,
        max_port_size: usize,
        widening_features: &FeatureMayAlwaysSet,
    ) {
        if port.path().len() > max_port_size {
            port.truncate(max_port_size);
            taint.add_locally_inferred_features(widening_features);
        }
        let target = match tree {
            TreeKind::Generations => &mut self.generations,
            TreeKind::Sinks => &mut self.sinks,
            TreeKind::Propagations => &mut self.propagations,
        };
        target.write(&port, taint, UpdateKind::Weak);
    }

    /// Apply global and port sanitizers in the given direction.
    pub fn apply_sanitizers(
        &self,
        direction: TransformDirection,
        taint: Taint,
        root: Root,
        context: &AnalysisContext,
    ) -> Taint {
        let mut result = taint;
        let port_sanitizers = self.port_sanitizers.get(&root);
        let sanitizers = self
            .global_sanitizers
            .iter()
            .chain(port_sanitizers.into_iter().flat_map(SanitizerSet::iter));
        for sanitizer in sanitizers {
            let matches_direction = match sanitizer.sanitizer_kind {
                SanitizerKind::Sources => direction == TransformDirection::Forward,
                SanitizerKind::Sinks => direction == TransformDirection::Backward,
                SanitizerKind::Propagations => false,
            };
            if !matches_direction {
                continue;
            }
            result = result.add_sanitize_transform(
                sanitizer.to_transform(context),
                direction,
                &context.kinds,
                &context.transforms,
            );
            if result.is_bottom() {
                break;
            }
        }
        result
    }

    /// The callee model as seen from one call site: taint trees
    /// propagated into the caller's context.
    pub fn at_callsite(&self, args: &CallsiteArgs<'_>) -> Model {
        let context = args.context;
        let call_site_context = CallSiteContext {
            strings: &context.strings,
            kinds: &context.kinds,
            transforms: &context.transforms,
            maximum_source_sink_distance: context
                .heuristics
                .k_max_call_chain_source_sink_distance,
            source_register_types: args.source_register_types,
            source_constant_arguments: args.source_constant_arguments,
            class_interval_context: args.class_interval_context,
            caller_class_interval: args.caller_class_interval,
        };

        let mut model = Model::new(Some(args.callee));
        model.modes = self.modes;
        model.frozen = self.frozen;
        model.global_sanitizers = self.global_sanitizers.clone();
        model.port_sanitizers = self.port_sanitizers.clone();
        model.add_features_to_arguments = self.add_features_to_arguments.clone();
        model.inline_as_getter = self.inline_as_getter.clone();
        model.inline_as_setter = self.inline_as_setter.clone();
        model.attach_to_sources = self.attach_to_sources.clone();
        model.attach_to_sinks = self.attach_to_sinks.clone();
        model.attach_to_propagations = self.attach_to_propagations.clone();

        model.generations = self.propagate_tree(
            &self.generations,
            &self.attach_to_sources,
            args,
            &call_site_context,
        );
        model.sinks = self.propagate_tree(
            &self.sinks,
            &self.attach_to_sinks,
            args,
            &call_site_context,
        );
        model.propagations = self.propagate_tree(
            &self.propagations,
            &self.attach_to_propagations,
            args,
            &call_site_context,
        );
        model.call_effect_sources = self.propagate_tree(
            &self.call_effect_sources,
            &self.attach_to_sources,
            args,
            &call_site_context,
        );
        model.call_effect_sinks = self.propagate_tree(
            &self.call_effect_sinks,
            &self.attach_to_sinks,
            args,
            &call_site_context,
        );
        // Parameter sources only matter when analyzing the method
        // itself; they do not flow to callers.

        model
    }

    fn propagate_tree(
        &self,
        tree: &TaintAccessPathTree,
        attach_features: &FxHashMap<Root, FeatureSet>,
        args: &CallsiteArgs<'_>,
        call_site_context: &CallSiteContext<'_>,
    ) -> TaintAccessPathTree {
        let mut result = TaintAccessPathTree::bottom();
        for (access_path, taint) in tree.elements() {
            let callee_port = args.context.access_paths.get(access_path.clone());
            let mut propagated = taint.propagate(
                Some(args.callee),
                callee_port,
                Some(args.call_position),
                call_site_context,
            );
            if propagated.is_bottom() {
                continue;
            }
            if let Some(features) = attach_features.get(&access_path.root()) {
                propagated.add_locally_inferred_features(
                    &FeatureMayAlwaysSet::make_always(features.clone()),
                );
            }
            result.write(&access_path, propagated, UpdateKind::Weak);
        }
        result
    }

    /// Replace a joined override set with one flat summary: class
    /// intervals collapse and the join feature marks every frame.
    pub fn collapse_for_override_join(&mut self, features: &FeatureMayAlwaysSet) {
        let collapse = |taint: &mut Taint| {
            taint.collapse_class_intervals();
            taint.add_locally_inferred_features(features);
        };
        self.generations.map_trees(|tree| tree.map_taint(collapse));
        self.sinks.map_trees(|tree| tree.map_taint(collapse));
        self.propagations.map_trees(|tree| tree.map_taint(collapse));
        self.call_effect_sources
            .map_trees(|tree| tree.map_taint(collapse));
        self.call_effect_sinks
            .map_trees(|tree| tree.map_taint(collapse));
    }

    /// Widen: collapse trees past the heuristics' bounds, attaching the
    /// broadening features to everything collapsed.
    pub fn approximate(&mut self, context: &AnalysisContext) {
        let features = context.always_features(&["via-broadening", "via-widen-broadening"]);
        let heuristics = &context.heuristics;
        self.generations.shape_with_limits(
            heuristics.k_generation_max_port_size,
            heuristics.k_generation_max_output_path_leaves,
            &features,
        );
        self.parameter_sources.shape_with_limits(
            heuristics.k_parameter_source_max_port_size,
            heuristics.k_parameter_source_max_output_path_leaves,
            &features,
        );
        self.sinks.shape_with_limits(
            heuristics.k_sink_max_port_size,
            heuristics.k_sink_max_input_path_leaves,
            &features,
        );
        self.call_effect_sources.shape_with_limits(
            heuristics.k_call_effect_source_max_port_size,
            heuristics.k_call_effect_source_max_output_path_leaves,
            &features,
        );
        self.call_effect_sinks.shape_with_limits(
            heuristics.k_call_effect_sink_max_port_size,
            heuristics.k_call_effect_sink_max_input_path_leaves,
            &features,
        );
        self.propagations.shape_with_limits(
            heuristics.k_propagation_max_input_path_size,
            heuristics.k_propagation_max_input_path_leaves,
            &features,
        );
    }

    /// A fresh model for the next fixpoint iteration: structure without
    /// the inferred taint.
    pub fn initial_model_for_iteration(&self) -> Model {
        let mut model = Model::new(self.method);
        model.modes = self.modes;
        model.frozen = self.frozen;
        model.global_sanitizers = self.global_sanitizers.clone();
        model.port_sanitizers = self.port_sanitizers.clone();
        model.attach_to_sources = self.attach_to_sources.clone();
        model.attach_to_sinks = self.attach_to_sinks.clone();
        model.attach_to_propagations = self.attach_to_propagations.clone();
        model.add_features_to_arguments = self.add_features_to_arguments.clone();
        model.model_generators = self.model_generators.clone();
        // Frozen trees and declared parameter sources survive iteration.
        if self.is_frozen(FreezeKind::Generations) {
            model.generations = self.generations.clone();
        }
        if self.is_frozen(FreezeKind::Sinks) {
            model.sinks = self.sinks.clone();
        }
        if self.is_frozen(FreezeKind::Propagations) {
            model.propagations = self.propagations.clone();
        }
        model.parameter_sources = self.parameter_sources.clone();
        model.call_effect_sources = self.call_effect_sources.clone();
        model
    }

    pub fn empty(&self) -> bool {
        self.modes == Modes::empty()
            && self.frozen == Frozen::empty()
            && self.generations.is_bottom()
            && self.parameter_sources.is_bottom()
            && self.sinks.is_bottom()
            && self.call_effect_sources.is_bottom()
            && self.call_effect_sinks.is_bottom()
            && self.propagations.is_bottom()
            && self.global_sanitizers.is_empty()
            && self.port_sanitizers.is_empty()
            && self.attach_to_sources.is_empty()
            && self.attach_to_sinks.is_empty()
            && self.attach_to_propagations.is_empty()
            && self.add_features_to_arguments.is_empty()
            && self.inline_as_getter.is_bottom()
            && self.inline_as_setter.is_bottom()
            && self.issues.is_empty()
    }

    pub fn leq(&self, other: &Model) -> bool {
        self.modes.is_subset(other.modes)
            && (self.is_frozen(FreezeKind::Generations)
                || self.generations.leq(&other.generations))
            && (self.is_frozen(FreezeKind::ParameterSources)
                || self.parameter_sources.leq(&other.parameter_sources))
            && (self.is_frozen(FreezeKind::Sinks) || self.sinks.leq(&other.sinks))
            && self.call_effect_sources.leq(&other.call_effect_sources)
            && self.call_effect_sinks.leq(&other.call_effect_sinks)
            && (self.is_frozen(FreezeKind::Propagations)
                || self.propagations.leq(&other.propagations))
            && self.global_sanitizers.is_subset(&other.global_sanitizers)
            && self.inline_as_getter.leq(&other.inline_as_getter)
            && self.inline_as_setter.leq(&other.inline_as_setter)
            && self.issues.leq(&other.issues)
    }

    pub fn join_with(&mut self, other: &Model) {
        debug_assert!(
            self.method.is_none()
                || other.method.is_none()
                || self.method == other.method
        );
        self.modes.union_with(other.modes);
        self.frozen.union_with(other.frozen);
        if !self.is_frozen(FreezeKind::Generations) {
            self.generations.join_with(other.generations.clone());
        }
        if !self.is_frozen(FreezeKind::ParameterSources) {
            self.parameter_sources
                .join_with(other.parameter_sources.clone());
        }
        if !self.is_frozen(FreezeKind::Sinks) {
            self.sinks.join_with(other.sinks.clone());
        }
        self.call_effect_sources
            .join_with(other.call_effect_sources.clone());
        self.call_effect_sinks
            .join_with(other.call_effect_sinks.clone());
        if !self.is_frozen(FreezeKind::Propagations) {
            self.propagations.join_with(other.propagations.clone());
        }
        self.global_sanitizers.join_with(&other.global_sanitizers);
        for (root, sanitizers) in &other.port_sanitizers {
            self.port_sanitizers
                .entry(*root)
                .or_default()
                .join_with(sanitizers);
        }
        for (root, features) in &other.attach_to_sources {
            self.attach_to_sources
                .entry(*root)
                .or_default()
                .union_with(features);
        }
        for (root, features) in &other.attach_to_sinks {
            self.attach_to_sinks
                .entry(*root)
                .or_default()
                .union_with(features);
        }
        for (root, features) in &other.attach_to_propagations {
            self.attach_to_propagations
                .entry(*root)
                .or_default()
                .union_with(features);
        }
        for (root, features) in &other.add_features_to_arguments {
            self.add_features_to_arguments
                .entry(*root)
                .or_default()
                .union_with(features);
        }
        self.inline_as_getter
            .join_with(other.inline_as_getter.clone());
        self.inline_as_setter
            .join_with(other.inline_as_setter.clone());
        self.model_generators
            .extend(other.model_generators.iter().cloned());
        self.issues.join_with(other.issues.clone());
    }

    pub fn equals(&self, other: &Model) -> bool {
        self.leq(other) && other.leq(self)
    }

    // Validation.

    fn method_name(&self) -> String {
        self.method
            .map(|method| method.signature())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    fn check_port(
        &self,
        port: &AccessPath,
        context: &AnalysisContext,
    ) -> Result<(), ModelValidationError> {
        let Some(method) = self.method else {
            return Ok(());
        };
        if port.root().is_argument()
            && port.root().parameter_position() >= method.number_of_parameters()
        {
            return Err(ModelValidationError::PortOutOfRange {
                method: method.signature(),
                port: port.to_string_with(&context.strings),
            });
        }
        Ok(())
    }

    fn intern_port(&self, port: &AccessPath, context: &AnalysisContext) -> AccessPathHandle {
        context.access_paths.get(port.clone())
    }
}

enum TreeKind {
    Generations,
    Sinks,
    Propagations,
}

/// A summary of a field: sources and sinks attached to it.
#[derive(Debug, Clone, Default)]
pub struct FieldModel {
    pub sources: Taint,
    pub sinks: Taint,
}

impl FieldModel {
    pub fn is_empty(&self) -> bool {
        self.sources.is_bottom() && self.sinks.is_bottom()
    }

    pub fn join_with(&mut self, other: &FieldModel) {
        self.sources.join_with(other.sources.clone());
        self.sinks.join_with(other.sinks.clone());
    }

    pub fn leq(&self, other: &FieldModel) -> bool {
        self.sources.leq(&other.sources) && self.sinks.leq(&other.sinks)
    }
}

/// A summary of string literals matching a pattern: sources attached to
/// every matching `const-string`.
#[derive(Debug, Clone)]
pub struct LiteralModel {
    pub pattern: String,
    pub sources: Taint,
}

impl LiteralModel {
    pub fn matches(&self, literal: &str) -> bool {
        literal.contains(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AnalysisContext {
        AnalysisContext::for_test()
    }

    #[test]
    fn modes_round_trip_names() {
        for mode in ALL_MODES {
            assert_eq!(Mode::from_name(mode.name()), Some(mode));
        }
        let mut modes = Modes::empty();
        modes.insert(Mode::TaintInTaintOut);
        assert!(modes.contains(Mode::TaintInTaintOut));
        assert!(!modes.contains(Mode::SkipAnalysis));
        assert!(modes.is_subset(Modes::from_iter([
            Mode::TaintInTaintOut,
            Mode::SkipAnalysis
        ])));
    }

    #[test]
    fn generation_on_void_return_is_rejected() {
        let context = context();
        let mut methods = crate::ir::Methods::new();
        let method = methods.create(
            crate::ir::Method::new(
                "LFoo;".to_string(),
                "f".to_string(),
                vec![],
                "V".to_string(),
                true,
            ),
            None,
        );

        let kind = context.kinds.named(context.str("Secret"));
        let mut model = Model::new(Some(method));
        let result = model.add_generation(
            AccessPath::from_root(Root::return_value()),
            TaintConfig::new(kind),
            &context,
        );
        assert!(matches!(
            result,
            Err(ModelValidationError::GenerationOnVoidReturn { .. })
        ));
    }

    #[test]
    fn port_out_of_range_is_rejected() {
        let context = context();
        let mut methods = crate::ir::Methods::new();
        let method = methods.create(
            crate::ir::Method::new(
                "LFoo;".to_string(),
                "f".to_string(),
                vec!["LData;".to_string()],
                "V".to_string(),
                true,
            ),
            None,
        );

        let kind = context.kinds.named(context.str("Sink"));
        let mut model = Model::new(Some(method));
        let result = model.add_sink(
            AccessPath::from_root(Root::argument(4)),
            TaintConfig::new(kind),
            &context,
        );
        assert!(matches!(
            result,
            Err(ModelValidationError::PortOutOfRange { .. })
        ));
    }

    #[test]
    fn taint_in_taint_out_synthesizes_propagations() {
        let context = context();
        let mut methods = crate::ir::Methods::new();
        let method = methods.create(
            crate::ir::Method::new(
                "LFoo;".to_string(),
                "f".to_string(),
                vec!["LData;".to_string()],
                "LData;".to_string(),
                true,
            ),
            None,
        );

        let mut model = Model::new(Some(method));
        model.add_mode(Mode::AddViaObscureFeature, &context);
        model.add_mode(Mode::TaintInTaintOut, &context);
        assert!(!model.propagations().is_bottom());
        let entries = model.propagations().elements();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].0.root().is_argument());
    }

    #[test]
    fn join_respects_frozen_trees() {
        let context = context();
        let kind = context.kinds.named(context.str("Secret"));

        let mut frozen_model = Model::new(None);
        frozen_model.freeze(FreezeKind::Generations);

        let mut other = Model::new(None);
        other
            .add_generation(
                AccessPath::from_root(Root::return_value()),
                TaintConfig::new(kind),
                &context,
            )
            .unwrap();

        frozen_model.join_with(&other);
        assert!(frozen_model.generations().is_bottom());
    }

    #[test]
    fn leq_and_join_on_models() {
        let context = context();
        let kind = context.kinds.named(context.str("Secret"));

        let empty = Model::new(None);
        let mut with_generation = Model::new(None);
        with_generation
            .add_generation(
                AccessPath::from_root(Root::return_value()),
                TaintConfig::new(kind),
                &context,
            )
            .unwrap();

        assert!(empty.leq(&with_generation));
        assert!(!with_generation.leq(&empty));

        let mut joined = empty.clone();
        joined.join_with(&with_generation);
        assert!(joined.equals(&with_generation));
    }
}
