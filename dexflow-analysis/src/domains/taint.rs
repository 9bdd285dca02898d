//! `Taint`: the principal taint domain, a partition of frames by call
//! info.

use rustc_hash::{FxHashMap, FxHashSet};

use super::call_info::CallInfo;
use super::features::FeatureMayAlwaysSet;
use super::frame::Frame;
use super::kind_frames::CallSiteContext;
use super::lattice::AbstractDomain;
use super::local_taint::LocalTaint;
use super::path_tree::CollapseDepth;
use crate::access::{AccessPathHandle, PathElement};
use crate::ir::{MethodHandle, PositionHandle};
use crate::kinds::{
    KindFactory, KindHandle, TransformDirection, TransformHandle, TransformListHandle,
    TransformsFactory,
};

/// Map `CallInfo → LocalTaint`.
#[derive(Debug, Clone, Default)]
pub struct Taint {
    map: FxHashMap<CallInfo, LocalTaint>,
}

impl Taint {
    pub fn from_local(local: LocalTaint) -> Self {
        let mut taint = Taint::bottom();
        taint.add_local(local);
        taint
    }

    pub fn from_frame(call_info: CallInfo, frame: Frame) -> Self {
        Taint::from_local(LocalTaint::from_frame(call_info, frame))
    }

    pub fn add_local(&mut self, local: LocalTaint) {
        let Some(call_info) = local.call_info().copied() else {
            return;
        };
        self.map
            .entry(call_info)
            .or_insert_with(LocalTaint::bottom)
            .join_with(local);
    }

    pub fn add_frame(&mut self, call_info: CallInfo, frame: Frame) {
        self.add_local(LocalTaint::from_frame(call_info, frame));
    }

    pub fn locals(&self) -> impl Iterator<Item = &LocalTaint> {
        self.map.values()
    }

    pub fn num_frames(&self) -> usize {
        self.map.values().map(LocalTaint::num_frames).sum()
    }

    pub fn visit_frames(&self, mut visitor: impl FnMut(&CallInfo, &Frame)) {
        for local in self.map.values() {
            local.visit_frames(&mut visitor);
        }
    }

    pub fn transform_locals(&mut self, f: impl Fn(LocalTaint) -> LocalTaint) {
        let map = std::mem::take(&mut self.map);
        for (_, local) in map {
            let transformed = f(local);
            if !transformed.is_bottom() {
                self.add_local(transformed);
            }
        }
    }

    /// All kinds present in this taint.
    pub fn kinds(&self) -> FxHashSet<KindHandle> {
        let mut kinds = FxHashSet::default();
        for local in self.map.values() {
            kinds.extend(local.kinds());
        }
        kinds
    }

    pub fn contains_kind(&self, kind: KindHandle) -> bool {
        self.map.values().any(|local| local.contains_kind(kind))
    }

    /// The maximum distance of any frame.
    pub fn distance(&self) -> u32 {
        let mut distance = 0;
        self.visit_frames(|_, frame| distance = distance.max(frame.distance()));
        distance
    }

    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_empty() || features.is_bottom() {
            return;
        }
        for local in self.map.values_mut() {
            local.add_locally_inferred_features(features);
        }
    }

    pub fn add_local_position(&mut self, position: PositionHandle) {
        for local in self.map.values_mut() {
            local.add_local_position(position);
        }
    }

    pub fn add_origins_if_declaration(
        &mut self,
        method: MethodHandle,
        port: AccessPathHandle,
    ) {
        for local in self.map.values_mut() {
            local.add_origins_if_declaration(method, port);
        }
        self.drop_bottoms();
    }

    pub fn add_field_origins_if_declaration(&mut self, field: crate::ir::FieldHandle) {
        for local in self.map.values_mut() {
            local.add_field_origins_if_declaration(field);
        }
        self.drop_bottoms();
    }

    /// Append a path element to propagation output paths; used while
    /// reading down into backward taint.
    pub fn append_to_propagation_output_paths(&mut self, element: PathElement) {
        for local in self.map.values_mut() {
            local.append_to_propagation_output_paths(element);
        }
        self.drop_bottoms();
    }

    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        for local in self.map.values_mut() {
            local.update_maximum_collapse_depth(collapse_depth);
        }
        self.drop_bottoms();
    }

    /// Propagate from a callee into the caller at one call site.
    pub fn propagate(
        &self,
        callee: Option<MethodHandle>,
        callee_port: AccessPathHandle,
        call_position: Option<PositionHandle>,
        context: &CallSiteContext<'_>,
    ) -> Taint {
        let mut result = Taint::bottom();
        for local in self.map.values() {
            let propagated = local.propagate(callee, callee_port, call_position, context);
            if !propagated.is_bottom() {
                result.add_local(propagated);
            }
        }
        result
    }

    /// The leaf taint re-anchored at the given position as origins.
    pub fn attach_position(&self, position: PositionHandle) -> Taint {
        let mut result = Taint::bottom();
        for local in self.map.values() {
            let attached = local.attach_position(position);
            if !attached.is_bottom() {
                result.add_local(attached);
            }
        }
        result
    }

    pub fn apply_transform(
        &self,
        local_transforms: TransformListHandle,
        direction: TransformDirection,
        kinds: &KindFactory,
        transforms: &TransformsFactory,
    ) -> Taint {
        let mut result = Taint::bottom();
        for local in self.map.values() {
            let transformed =
                local.apply_transform(local_transforms, direction, kinds, transforms);
            if !transformed.is_bottom() {
                result.add_local(transformed);
            }
        }
        result
    }

    pub fn add_sanitize_transform(
        &self,
        sanitizer: TransformHandle,
        direction: TransformDirection,
        kinds: &KindFactory,
        transforms: &TransformsFactory,
    ) -> Taint {
        let mut result = Taint::bottom();
        for local in self.map.values() {
            let sanitized =
                local.add_sanitize_transform(sanitizer, direction, kinds, transforms);
            if !sanitized.is_bottom() {
                result.add_local(sanitized);
            }
        }
        result
    }

    pub fn transform_kind_with_features(
        &mut self,
        transform_kind: impl Fn(KindHandle) -> Vec<KindHandle> + Copy,
        add_features: impl Fn(KindHandle) -> FeatureMayAlwaysSet + Copy,
    ) {
        let map = std::mem::take(&mut self.map);
        for (_, mut local) in map {
            local.transform_kind_with_features(transform_kind, add_features);
            if !local.is_bottom() {
                self.add_local(local);
            }
        }
    }

    pub fn filter_invalid_frames(
        &mut self,
        is_valid: impl Fn(Option<MethodHandle>, AccessPathHandle, KindHandle) -> bool + Copy,
    ) {
        for local in self.map.values_mut() {
            local.filter_invalid_frames(is_valid);
        }
        self.drop_bottoms();
    }

    pub fn features_joined(&self) -> FeatureMayAlwaysSet {
        let mut features = FeatureMayAlwaysSet::bottom();
        for local in self.map.values() {
            features.join_with(local.features_joined());
        }
        features
    }

    pub fn collapse_class_intervals(&mut self) {
        for local in self.map.values_mut() {
            local.collapse_class_intervals();
        }
    }

    /// Per-call-info difference: a local taint covered by the other
    /// side's entry is dropped. Only used when known safe.
    pub fn difference_with(&mut self, other: &Taint) {
        self.map.retain(|call_info, local| {
            if let Some(other_local) = other.map.get(call_info) {
                local.difference_with(other_local);
            }
            !local.is_bottom()
        });
    }

    /// Attach the position to declaration leaves, turning them into
    /// origins; already-propagated taint passes through unchanged.
    pub fn update_leaf_positions(&self, position: PositionHandle) -> Taint {
        let mut result = Taint::bottom();
        for local in self.map.values() {
            if local.callee().is_none()
                && local
                    .call_kind()
                    .is_some_and(super::call_info::CallKind::is_declaration)
            {
                let attached = local.attach_position(position);
                if !attached.is_bottom() {
                    result.add_local(attached);
                }
            } else {
                result.add_local(local.clone());
            }
        }
        result
    }

    /// Split into (plain taint, propagation taint).
    pub fn partition_propagations(&self) -> (Taint, Taint) {
        let mut plain = self.clone();
        let mut propagations = self.clone();
        plain.filter_invalid_frames(|_, _, kind| {
            !kind.discard_transforms().is_propagation()
        });
        propagations
            .filter_invalid_frames(|_, _, kind| kind.discard_transforms().is_propagation());
        (plain, propagations)
    }

    fn drop_bottoms(&mut self) {
        self.map.retain(|_, local| !local.is_bottom());
    }
}

impl AbstractDomain for Taint {
    fn bottom() -> Self {
        Taint {
            map: FxHashMap::default(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.map.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.map.iter().all(|(call_info, local)| {
            other
                .map
                .get(call_info)
                .map_or(false, |other_local| local.leq(other_local))
        })
    }

    fn join_with(&mut self, other: Self) {
        for (call_info, local) in other.map {
            self.map
                .entry(call_info)
                .or_insert_with(LocalTaint::bottom)
                .join_with(local);
        }
    }

    fn meet_with(&mut self, other: Self) {
        let map = std::mem::take(&mut self.map);
        for (call_info, mut local) in map {
            if let Some(other_local) = other.map.get(&call_info) {
                local.meet_with(other_local.clone());
                if !local.is_bottom() {
                    self.map.insert(call_info, local);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, AccessPathFactory, Root};
    use crate::domains::call_info::CallKind;
    use crate::domains::interval::{CallClassIntervalContext, ClassInterval};
    use lasso::ThreadedRodeo;

    fn leaf_taint(
        strings: &ThreadedRodeo,
        kinds: &KindFactory,
        access_paths: &AccessPathFactory,
        kind_name: &str,
    ) -> Taint {
        let kind = kinds.named(strings.get_or_intern(kind_name));
        let port = access_paths.get(AccessPath::from_root(Root::leaf()));
        Taint::from_frame(CallInfo::declaration(port), Frame::leaf(kind))
    }

    #[test]
    fn taint_partitions_by_call_info() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let leaf_port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let return_port = access_paths.get(AccessPath::from_root(Root::return_value()));

        let mut taint = Taint::bottom();
        taint.add_frame(CallInfo::declaration(leaf_port), Frame::leaf(kind));
        taint.add_frame(CallInfo::declaration(return_port), Frame::leaf(kind));
        assert_eq!(taint.locals().count(), 2);
        assert_eq!(taint.num_frames(), 2);
    }

    #[test]
    fn join_with_self_is_identity() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();

        let taint = leaf_taint(&strings, &kinds, &access_paths, "Secret");
        let mut joined = taint.clone();
        joined.join_with(taint.clone());
        assert!(joined.equals(&taint));
    }

    #[test]
    fn propagate_moves_declaration_to_origin() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let transforms = TransformsFactory::new();
        let access_paths = AccessPathFactory::new();
        let positions = crate::ir::Positions::new();

        let taint = leaf_taint(&strings, &kinds, &access_paths, "Secret");
        let context = CallSiteContext {
            strings: &strings,
            kinds: &kinds,
            transforms: &transforms,
            maximum_source_sink_distance: 10,
            source_register_types: &[],
            source_constant_arguments: &[],
            class_interval_context: CallClassIntervalContext::default_context(),
            caller_class_interval: ClassInterval::top(),
        };

        let return_port = access_paths.get(AccessPath::from_root(Root::return_value()));
        let position = positions.get("Foo.java", 3);
        let propagated = taint.propagate(None, return_port, Some(position), &context);

        assert_eq!(propagated.locals().count(), 1);
        let local = propagated.locals().next().unwrap();
        assert_eq!(local.call_kind(), Some(CallKind::Origin));
        assert_eq!(local.call_position(), Some(position));
        assert_eq!(propagated.distance(), 0);
    }

    #[test]
    fn difference_with_removes_covered_taint() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();

        let mut taint = leaf_taint(&strings, &kinds, &access_paths, "Secret");
        let same = taint.clone();
        taint.difference_with(&same);
        assert!(taint.is_bottom());

        let mut bigger = leaf_taint(&strings, &kinds, &access_paths, "Secret");
        bigger.join_with(leaf_taint(&strings, &kinds, &access_paths, "Other"));
        let small = leaf_taint(&strings, &kinds, &access_paths, "Secret");
        bigger.difference_with(&small);
        assert!(!bigger.is_bottom());
        assert_eq!(bigger.kinds().len(), 1);
    }
}
