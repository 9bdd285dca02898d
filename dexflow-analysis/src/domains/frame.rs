//! `Frame`: one atom of taint.

use lasso::ThreadedRodeo;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::call_info::CallKind;
use super::features::{Feature, FeatureMayAlwaysSet, FeatureSet};
use super::interval::CallClassIntervalContext;
use super::lattice::AbstractDomain;
use super::origin::{CanonicalNameSet, OriginSet};
use super::path_tree::{CollapseDepth, PathTree};
use crate::access::{AccessPathHandle, PathElement, Root};
use crate::ir::{MethodHandle, PositionHandle};
use crate::kinds::KindHandle;

/// A prior transform hop recorded to reconstruct subtraces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtraTrace {
    pub kind: KindHandle,
    pub callee: Option<MethodHandle>,
    pub call_position: Option<PositionHandle>,
    pub callee_port: AccessPathHandle,
    pub call_kind: CallKind,
}

/// One atom of taint: kind, call context, distance, features, origins.
///
/// Invariants:
/// - declaration frames have distance 0 and no inferred features;
/// - origin frames are leaves with distance 0 and carry the declaring
///   method/field in their origins;
/// - `output_paths` is non-bottom only on propagation frames.
#[derive(Debug, Clone)]
pub struct Frame {
    kind: Option<KindHandle>,
    class_interval_context: CallClassIntervalContext,
    distance: u32,
    origins: OriginSet,
    inferred_features: FeatureMayAlwaysSet,
    user_features: FeatureSet,
    via_type_of_ports: SmallVec<[Root; 2]>,
    via_value_of_ports: SmallVec<[Root; 2]>,
    canonical_names: CanonicalNameSet,
    output_paths: PathTree<CollapseDepth>,
    extra_traces: FxHashSet<ExtraTrace>,
}

impl Frame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: KindHandle,
        class_interval_context: CallClassIntervalContext,
        distance: u32,
        origins: OriginSet,
        inferred_features: FeatureMayAlwaysSet,
        user_features: FeatureSet,
        via_type_of_ports: SmallVec<[Root; 2]>,
        via_value_of_ports: SmallVec<[Root; 2]>,
        canonical_names: CanonicalNameSet,
        output_paths: PathTree<CollapseDepth>,
        extra_traces: FxHashSet<ExtraTrace>,
    ) -> Self {
        Frame {
            kind: Some(kind),
            class_interval_context,
            distance,
            origins,
            inferred_features,
            user_features,
            via_type_of_ports,
            via_value_of_ports,
            canonical_names,
            output_paths,
            extra_traces,
        }
    }

    /// A bare leaf frame of the given kind.
    pub fn leaf(kind: KindHandle) -> Self {
        Frame {
            kind: Some(kind),
            ..Frame::bottom()
        }
    }

    /// A propagation frame with the given output paths.
    pub fn propagation(kind: KindHandle, output_paths: PathTree<CollapseDepth>) -> Self {
        debug_assert!(kind.is_propagation() || kind.is_transform());
        Frame {
            kind: Some(kind),
            output_paths,
            ..Frame::bottom()
        }
    }

    pub fn kind(&self) -> Option<KindHandle> {
        self.kind
    }

    pub fn class_interval_context(&self) -> CallClassIntervalContext {
        self.class_interval_context
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn origins(&self) -> &OriginSet {
        &self.origins
    }

    pub fn inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.inferred_features
    }

    pub fn user_features(&self) -> &FeatureSet {
        &self.user_features
    }

    pub fn via_type_of_ports(&self) -> &[Root] {
        &self.via_type_of_ports
    }

    pub fn via_value_of_ports(&self) -> &[Root] {
        &self.via_value_of_ports
    }

    pub fn canonical_names(&self) -> &CanonicalNameSet {
        &self.canonical_names
    }

    pub fn output_paths(&self) -> &PathTree<CollapseDepth> {
        &self.output_paths
    }

    pub fn extra_traces(&self) -> &FxHashSet<ExtraTrace> {
        &self.extra_traces
    }

    /// Inferred and user features, combined the way issues report them.
    pub fn features(&self) -> FeatureMayAlwaysSet {
        let mut features = self.inferred_features.clone();
        if features.is_bottom() {
            features = FeatureMayAlwaysSet::empty();
        }
        features.add_always(&self.user_features);
        features
    }

    pub fn add_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_empty() || features.is_bottom() {
            return;
        }
        self.inferred_features.add(features);
    }

    pub fn add_user_features(&mut self, features: &FeatureSet) {
        self.user_features.union_with(features);
    }

    pub fn add_origin(&mut self, origin: super::origin::Origin) {
        self.origins.add(origin);
    }

    pub fn add_extra_trace(&mut self, trace: ExtraTrace) {
        self.extra_traces.insert(trace);
    }

    pub fn with_kind(&self, kind: KindHandle) -> Frame {
        let mut frame = self.clone();
        frame.kind = Some(kind);
        frame
    }

    pub fn with_interval(&self, interval: CallClassIntervalContext) -> Frame {
        let mut frame = self.clone();
        frame.class_interval_context = interval;
        frame
    }

    pub fn with_origins(&self, origins: OriginSet) -> Frame {
        let mut frame = self.clone();
        frame.origins = origins;
        frame
    }

    pub fn with_distance(&self, distance: u32) -> Frame {
        let mut frame = self.clone();
        frame.distance = distance;
        frame
    }

    /// Append a path element to the propagation output paths, consuming
    /// one level of collapse depth.
    pub fn append_to_propagation_output_paths(&mut self, element: PathElement) {
        if self.output_paths.is_bottom() {
            return;
        }
        let elements: Vec<_> = self
            .output_paths
            .elements()
            .into_iter()
            .map(|(mut path, depth)| {
                path.append(element);
                (path, depth.decrement())
            })
            .collect();
        self.output_paths = PathTree::from_elements(elements);
    }

    /// Cap the collapse depth of all output paths.
    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        if self.output_paths.is_bottom() {
            return;
        }
        self.output_paths.map(|depth| {
            depth.meet_with(collapse_depth);
        });
    }

    /// Features for `via-type-of` ports, named after the source register
    /// types at the call site.
    pub fn materialize_via_type_of_ports(
        &self,
        source_register_types: &[Option<String>],
        strings: &ThreadedRodeo,
    ) -> Vec<Feature> {
        self.via_type_of_ports
            .iter()
            .map(|port| {
                let type_name = source_register_types
                    .get(port.parameter_position() as usize)
                    .and_then(Option::as_deref)
                    .unwrap_or("unknown");
                Feature::new(strings.get_or_intern(format!("via-type-of:{type_name}")))
            })
            .collect()
    }

    /// Features for `via-value-of` ports, named after the constant
    /// arguments at the call site.
    pub fn materialize_via_value_of_ports(
        &self,
        source_constant_arguments: &[Option<String>],
        strings: &ThreadedRodeo,
    ) -> Vec<Feature> {
        self.via_value_of_ports
            .iter()
            .map(|port| {
                let value = source_constant_arguments
                    .get(port.parameter_position() as usize)
                    .and_then(Option::as_deref)
                    .unwrap_or("unknown");
                Feature::new(strings.get_or_intern(format!("via-value-of:{value}")))
            })
            .collect()
    }
}

impl AbstractDomain for Frame {
    fn bottom() -> Self {
        Frame {
            kind: None,
            class_interval_context: CallClassIntervalContext::default_context(),
            distance: 0,
            origins: OriginSet::bottom(),
            inferred_features: FeatureMayAlwaysSet::bottom(),
            user_features: FeatureSet::bottom(),
            via_type_of_ports: SmallVec::new(),
            via_value_of_ports: SmallVec::new(),
            canonical_names: CanonicalNameSet::bottom(),
            output_paths: PathTree::bottom(),
            extra_traces: FxHashSet::default(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.kind.is_none()
    }

    fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        debug_assert_eq!(self.kind, other.kind);
        self.distance >= other.distance
            && self.origins.leq(&other.origins)
            && self.inferred_features.leq(&other.inferred_features)
            && self.user_features.leq(&other.user_features)
            && ports_subset(&self.via_type_of_ports, &other.via_type_of_ports)
            && ports_subset(&self.via_value_of_ports, &other.via_value_of_ports)
            && self.canonical_names.leq(&other.canonical_names)
            && self.output_paths.leq(&other.output_paths)
            && self.extra_traces.is_subset(&other.extra_traces)
    }

    fn join_with(&mut self, other: Self) {
        if other.is_bottom() {
            return;
        }
        if self.is_bottom() {
            *self = other;
            return;
        }
        debug_assert_eq!(self.kind, other.kind);
        debug_assert_eq!(self.class_interval_context, other.class_interval_context);
        // Preserve the shortest distance; the trace it witnesses exists.
        self.distance = self.distance.min(other.distance);
        self.origins.join_with(other.origins);
        self.inferred_features.join_with(other.inferred_features);
        self.user_features.join_with(other.user_features);
        for port in other.via_type_of_ports {
            if !self.via_type_of_ports.contains(&port) {
                self.via_type_of_ports.push(port);
            }
        }
        for port in other.via_value_of_ports {
            if !self.via_value_of_ports.contains(&port) {
                self.via_value_of_ports.push(port);
            }
        }
        self.canonical_names.join_with(other.canonical_names);
        self.output_paths.join_with(other.output_paths);
        self.extra_traces.extend(other.extra_traces);
    }

    fn meet_with(&mut self, other: Self) {
        if self.is_bottom() {
            return;
        }
        if other.is_bottom() {
            self.set_to_bottom();
            return;
        }
        if self.kind != other.kind {
            self.set_to_bottom();
            return;
        }
        self.distance = self.distance.max(other.distance);
        self.origins.meet_with(other.origins);
        self.inferred_features.meet_with(other.inferred_features);
        self.user_features.meet_with(other.user_features);
        self.canonical_names.meet_with(other.canonical_names);
        self.extra_traces
            .retain(|trace| other.extra_traces.contains(trace));
    }
}

fn ports_subset(left: &[Root], right: &[Root]) -> bool {
    left.iter().all(|port| right.contains(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::KindFactory;

    #[test]
    fn join_takes_minimum_distance() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let mut near = Frame::leaf(kind).with_distance(1);
        let far = Frame::leaf(kind).with_distance(5);
        assert!(far.leq(&near));
        assert!(!near.leq(&far));

        near.join_with(far);
        assert_eq!(near.distance(), 1);
    }

    #[test]
    fn bottom_is_identity_for_join() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let frame = Frame::leaf(kind);
        let mut joined = Frame::bottom();
        joined.join_with(frame.clone());
        assert!(joined.equals(&frame));
        assert!(Frame::bottom().leq(&frame));
        assert!(!frame.leq(&Frame::bottom()));
    }

    #[test]
    fn append_to_output_paths_decrements_collapse_depth() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let kind = kinds.local_return();

        let mut frame = Frame::propagation(
            kind,
            PathTree::from_value(CollapseDepth::new(4)),
        );
        let x = PathElement::field(strings.get_or_intern("x"));
        frame.append_to_propagation_output_paths(x);

        let elements = frame.output_paths().elements();
        assert_eq!(elements.len(), 1);
        let (path, depth) = &elements[0];
        assert_eq!(path.len(), 1);
        assert!(depth.equals(&CollapseDepth::new(3)));
    }
}
