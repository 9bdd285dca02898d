//! `LocalTaint`: a set of frames sharing one call info, plus local
//! positions and locally-inferred features.

use rustc_hash::{FxHashMap, FxHashSet};

use super::call_info::{CallInfo, CallKind};
use super::features::{FeatureMayAlwaysSet, FeatureSet};
use super::frame::Frame;
use super::kind_frames::{CallSiteContext, KindFrames};
use super::lattice::AbstractDomain;
use super::origin::Origin;
use super::path_tree::CollapseDepth;
use crate::access::{AccessPathHandle, PathElement};
use crate::ir::{MethodHandle, PositionHandle};
use crate::kinds::{
    KindFactory, KindHandle, TransformDirection, TransformListHandle, TransformsFactory,
};

/// Frames sharing one (callee, call kind, callee port, position).
#[derive(Debug, Clone)]
pub struct LocalTaint {
    call_info: Option<CallInfo>,
    frames: FxHashMap<KindHandle, KindFrames>,
    local_positions: FxHashSet<PositionHandle>,
    locally_inferred_features: FeatureMayAlwaysSet,
}

impl LocalTaint {
    pub fn from_frame(call_info: CallInfo, frame: Frame) -> Self {
        let mut taint = LocalTaint::bottom();
        taint.call_info = Some(call_info);
        taint.add(frame);
        taint
    }

    pub fn call_info(&self) -> Option<&CallInfo> {
        self.call_info.as_ref()
    }

    pub fn callee(&self) -> Option<MethodHandle> {
        self.call_info.as_ref().and_then(CallInfo::callee)
    }

    pub fn call_kind(&self) -> Option<CallKind> {
        self.call_info.as_ref().map(CallInfo::call_kind)
    }

    pub fn callee_port(&self) -> Option<AccessPathHandle> {
        self.call_info.as_ref().map(CallInfo::callee_port)
    }

    pub fn call_position(&self) -> Option<PositionHandle> {
        self.call_info.as_ref().and_then(CallInfo::call_position)
    }

    pub fn local_positions(&self) -> &FxHashSet<PositionHandle> {
        &self.local_positions
    }

    pub fn locally_inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.locally_inferred_features
    }

    /// Add a frame under this taint's call info.
    pub fn add(&mut self, frame: Frame) {
        let Some(kind) = frame.kind() else {
            return;
        };
        debug_assert!(self.call_info.is_some());
        self.frames
            .entry(kind)
            .or_insert_with(KindFrames::bottom)
            .add(frame);
    }

    pub fn kinds(&self) -> impl Iterator<Item = KindHandle> + '_ {
        self.frames.keys().copied()
    }

    pub fn contains_kind(&self, kind: KindHandle) -> bool {
        self.frames.contains_key(&kind)
    }

    pub fn num_frames(&self) -> usize {
        self.frames.values().map(KindFrames::num_frames).sum()
    }

    pub fn visit_frames(&self, mut visitor: impl FnMut(&CallInfo, &Frame)) {
        let Some(call_info) = &self.call_info else {
            return;
        };
        for frames in self.frames.values() {
            frames.visit(|frame| visitor(call_info, frame));
        }
    }

    pub fn transform_frames(&mut self, f: impl Fn(Frame) -> Frame) {
        for frames in self.frames.values_mut() {
            frames.transform(&f);
        }
        self.frames.retain(|_, frames| !frames.is_bottom());
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    pub fn filter_frames(&mut self, predicate: impl Fn(&Frame) -> bool) {
        for frames in self.frames.values_mut() {
            frames.filter(&predicate);
        }
        self.frames.retain(|_, frames| !frames.is_bottom());
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    /// On declaration taint, record the declaring method and port as the
    /// origin of every frame.
    pub fn add_origins_if_declaration(&mut self, method: MethodHandle, port: AccessPathHandle) {
        if !self.call_kind().is_some_and(CallKind::is_declaration) {
            return;
        }
        self.transform_frames(|mut frame| {
            frame.add_origin(Origin::Method { method, port });
            frame
        });
    }

    pub fn add_field_origins_if_declaration(&mut self, field: crate::ir::FieldHandle) {
        if !self.call_kind().is_some_and(CallKind::is_declaration) {
            return;
        }
        self.transform_frames(|mut frame| {
            frame.add_origin(Origin::Field(field));
            frame
        });
    }

    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_empty() || features.is_bottom() {
            return;
        }
        if self.locally_inferred_features.is_bottom() {
            self.locally_inferred_features = FeatureMayAlwaysSet::empty();
        }
        self.locally_inferred_features.add(features);
    }

    pub fn add_local_position(&mut self, position: PositionHandle) {
        if self.call_kind().is_some_and(CallKind::is_propagation) {
            return; // Do not add local positions on propagations.
        }
        self.local_positions.insert(position);
    }

    pub fn set_local_positions(&mut self, positions: FxHashSet<PositionHandle>) {
        if self.call_kind().is_some_and(CallKind::is_propagation) {
            return;
        }
        self.local_positions = positions;
    }

    /// Append a path element to the output paths of all propagation
    /// frames.
    pub fn append_to_propagation_output_paths(&mut self, element: PathElement) {
        if !self.call_kind().is_some_and(CallKind::is_propagation) {
            return;
        }
        self.transform_frames(|mut frame| {
            frame.append_to_propagation_output_paths(element);
            frame
        });
    }

    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        if !self.call_kind().is_some_and(CallKind::is_propagation) {
            return;
        }
        self.transform_frames(|mut frame| {
            frame.update_maximum_collapse_depth(collapse_depth);
            frame
        });
    }

    /// Propagate this taint from the callee into the caller at a call
    /// site. Returns bottom if every frame is dropped.
    pub fn propagate(
        &self,
        callee: Option<MethodHandle>,
        callee_port: AccessPathHandle,
        call_position: Option<PositionHandle>,
        context: &CallSiteContext<'_>,
    ) -> LocalTaint {
        let Some(call_info) = &self.call_info else {
            return LocalTaint::bottom();
        };
        debug_assert!(!call_info.call_kind().is_propagation_without_trace());

        let propagated_call_info = call_info.propagate(callee, callee_port, call_position);

        let mut propagated_frames: FxHashMap<KindHandle, KindFrames> =
            FxHashMap::default();
        for frames in self.frames.values() {
            let propagated = frames.propagate(
                callee,
                &propagated_call_info,
                &self.locally_inferred_features,
                context,
            );
            if let Some(kind) = propagated.kind() {
                propagated_frames
                    .entry(kind)
                    .or_insert_with(KindFrames::bottom)
                    .join_with(propagated);
            }
        }

        if propagated_frames.is_empty() {
            return LocalTaint::bottom();
        }

        LocalTaint {
            call_info: Some(propagated_call_info),
            frames: propagated_frames,
            local_positions: FxHashSet::default(),
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
        }
    }

    /// Turn leaf taint into origin taint at the given position. Used for
    /// return sources and parameter sinks that may appear in issues:
    /// user features become locally-inferred always features.
    pub fn attach_position(&self, call_position: PositionHandle) -> LocalTaint {
        let Some(call_info) = &self.call_info else {
            return LocalTaint::bottom();
        };
        if call_info.callee().is_some() {
            return LocalTaint::bottom(); // Only propagate leaves.
        }

        let mut user_features = FeatureSet::bottom();
        let mut frames: FxHashMap<KindHandle, KindFrames> = FxHashMap::default();
        self.visit_frames(|_, frame| {
            user_features.union_with(frame.user_features());
            let mut inferred = frame.features();
            inferred.add(&self.locally_inferred_features);
            let new_frame = Frame::new(
                frame.kind().expect("non-bottom frame"),
                frame.class_interval_context(),
                0,
                frame.origins().clone(),
                inferred,
                FeatureSet::bottom(),
                Default::default(),
                Default::default(),
                frame.canonical_names().clone(),
                super::path_tree::PathTree::bottom(),
                frame.extra_traces().clone(),
            );
            frames
                .entry(new_frame.kind().expect("non-bottom frame"))
                .or_insert_with(KindFrames::bottom)
                .add(new_frame);
        });

        let locally_inferred = if user_features.is_empty() {
            FeatureMayAlwaysSet::bottom()
        } else {
            FeatureMayAlwaysSet::make_always(user_features)
        };

        LocalTaint {
            call_info: Some(CallInfo::new(
                None,
                CallKind::Origin,
                call_info.callee_port(),
                Some(call_position),
            )),
            frames,
            local_positions: self.local_positions.clone(),
            locally_inferred_features: locally_inferred,
        }
    }

    /// Apply a transform list to every frame.
    pub fn apply_transform(
        &self,
        local_transforms: TransformListHandle,
        direction: TransformDirection,
        kinds: &KindFactory,
        transforms: &TransformsFactory,
    ) -> LocalTaint {
        let mut new_frames: FxHashMap<KindHandle, KindFrames> = FxHashMap::default();
        for frames in self.frames.values() {
            let transformed =
                frames.apply_transform(local_transforms, direction, kinds, transforms);
            if let Some(kind) = transformed.kind() {
                new_frames
                    .entry(kind)
                    .or_insert_with(KindFrames::bottom)
                    .join_with(transformed);
            }
        }
        if new_frames.is_empty() {
            return LocalTaint::bottom();
        }
        LocalTaint {
            call_info: self.call_info,
            frames: new_frames,
            local_positions: self.local_positions.clone(),
            locally_inferred_features: self.locally_inferred_features.clone(),
        }
    }

    /// Add a sanitizer transform to every frame, dropping sanitized
    /// kinds.
    pub fn add_sanitize_transform(
        &self,
        sanitizer: crate::kinds::TransformHandle,
        direction: TransformDirection,
        kinds: &KindFactory,
        transforms: &TransformsFactory,
    ) -> LocalTaint {
        let mut new_frames: FxHashMap<KindHandle, KindFrames> = FxHashMap::default();
        for frames in self.frames.values() {
            let sanitized =
                frames.add_sanitize_transform(sanitizer, direction, kinds, transforms);
            if let Some(kind) = sanitized.kind() {
                new_frames
                    .entry(kind)
                    .or_insert_with(KindFrames::bottom)
                    .join_with(sanitized);
            }
        }
        if new_frames.is_empty() {
            return LocalTaint::bottom();
        }
        LocalTaint {
            call_info: self.call_info,
            frames: new_frames,
            local_positions: self.local_positions.clone(),
            locally_inferred_features: self.locally_inferred_features.clone(),
        }
    }

    /// Map every kind through `transform_kind` (empty result drops the
    /// frames) and add `add_features(new_kind)` to transformed frames.
    pub fn transform_kind_with_features(
        &mut self,
        transform_kind: impl Fn(KindHandle) -> Vec<KindHandle>,
        add_features: impl Fn(KindHandle) -> FeatureMayAlwaysSet,
    ) {
        let mut new_frames: FxHashMap<KindHandle, KindFrames> = FxHashMap::default();
        for (&old_kind, frames) in &self.frames {
            let new_kinds = transform_kind(old_kind);
            if new_kinds.is_empty() {
                continue;
            }
            if new_kinds.len() == 1 && new_kinds[0] == old_kind {
                new_frames
                    .entry(old_kind)
                    .or_insert_with(KindFrames::bottom)
                    .join_with(frames.clone());
                continue;
            }
            for new_kind in new_kinds {
                let mut mapped = frames.with_kind(new_kind);
                mapped.add_inferred_features(&add_features(new_kind));
                new_frames
                    .entry(new_kind)
                    .or_insert_with(KindFrames::bottom)
                    .join_with(mapped);
            }
        }
        self.frames = new_frames;
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    /// Split by a kind projection, preserving call info and local state.
    pub fn partition_by_kind<T: std::hash::Hash + Eq>(
        &self,
        map_kind: impl Fn(KindHandle) -> T,
    ) -> FxHashMap<T, LocalTaint> {
        let mut result: FxHashMap<T, LocalTaint> = FxHashMap::default();
        for (&kind, frames) in &self.frames {
            let entry = result.entry(map_kind(kind)).or_insert_with(LocalTaint::bottom);
            let partition = LocalTaint {
                call_info: self.call_info,
                frames: FxHashMap::from_iter([(kind, frames.clone())]),
                local_positions: self.local_positions.clone(),
                locally_inferred_features: self.locally_inferred_features.clone(),
            };
            entry.join_with(partition);
        }
        result
    }

    /// Frame-wise difference; only applied when local state is covered.
    pub fn difference_with(&mut self, other: &LocalTaint) {
        if self.is_bottom() {
            return;
        }
        if other.is_bottom() {
            return;
        }
        assert_eq!(
            self.call_info, other.call_info,
            "difference between local taints with different call info"
        );
        if !self
            .locally_inferred_features
            .leq(&other.locally_inferred_features)
            || !self.local_positions.is_subset(&other.local_positions)
        {
            return;
        }
        for (kind, frames) in self.frames.iter_mut() {
            if let Some(other_frames) = other.frames.get(kind) {
                frames.difference_with(other_frames);
            }
        }
        self.frames.retain(|_, frames| !frames.is_bottom());
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    pub fn filter_invalid_frames(
        &mut self,
        is_valid: impl Fn(Option<MethodHandle>, AccessPathHandle, KindHandle) -> bool,
    ) {
        let Some(call_info) = self.call_info else {
            return;
        };
        let callee = call_info.callee();
        let callee_port = call_info.callee_port();
        self.frames
            .retain(|&kind, _| is_valid(callee, callee_port, kind));
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    /// The join of all frames' features plus the locally inferred ones.
    pub fn features_joined(&self) -> FeatureMayAlwaysSet {
        let mut features = FeatureMayAlwaysSet::bottom();
        self.visit_frames(|_, frame| {
            let mut combined = frame.features();
            combined.add(&self.locally_inferred_features);
            features.join_with(combined);
        });
        features
    }

    pub fn collapse_class_intervals(&mut self) {
        for frames in self.frames.values_mut() {
            frames.collapse_class_intervals();
        }
    }
}

impl AbstractDomain for LocalTaint {
    fn bottom() -> Self {
        LocalTaint {
            call_info: None,
            frames: FxHashMap::default(),
            local_positions: FxHashSet::default(),
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.frames.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        assert_eq!(
            self.call_info, other.call_info,
            "comparing local taints with different call info"
        );
        self.frames.iter().all(|(kind, frames)| {
            other
                .frames
                .get(kind)
                .map_or(false, |other_frames| frames.leq(other_frames))
        }) && self.local_positions.is_subset(&other.local_positions)
            && self
                .locally_inferred_features
                .leq(&other.locally_inferred_features)
    }

    fn join_with(&mut self, other: Self) {
        if other.is_bottom() {
            return;
        }
        if self.is_bottom() {
            *self = other;
            return;
        }
        assert_eq!(
            self.call_info, other.call_info,
            "joining local taints with different call info"
        );
        for (kind, frames) in other.frames {
            self.frames
                .entry(kind)
                .or_insert_with(KindFrames::bottom)
                .join_with(frames);
        }
        self.local_positions.extend(other.local_positions);
        self.locally_inferred_features
            .join_with(other.locally_inferred_features);
    }

    fn meet_with(&mut self, other: Self) {
        if self.is_bottom() {
            return;
        }
        if other.is_bottom() {
            self.set_to_bottom();
            return;
        }
        assert_eq!(
            self.call_info, other.call_info,
            "meet of local taints with different call info"
        );
        let mut frames = FxHashMap::default();
        for (kind, mut kind_frames) in std::mem::take(&mut self.frames) {
            if let Some(other_frames) = other.frames.get(&kind) {
                kind_frames.meet_with(other_frames.clone());
                if !kind_frames.is_bottom() {
                    frames.insert(kind, kind_frames);
                }
            }
        }
        self.frames = frames;
        if self.frames.is_empty() {
            self.set_to_bottom();
            return;
        }
        self.local_positions
            .retain(|position| other.local_positions.contains(position));
        self.locally_inferred_features
            .meet_with(other.locally_inferred_features);
    }

    fn set_to_bottom(&mut self) {
        self.call_info = None;
        self.frames.clear();
        self.local_positions.clear();
        self.locally_inferred_features = FeatureMayAlwaysSet::bottom();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, AccessPathFactory, Root};
    use lasso::ThreadedRodeo;

    #[test]
    #[should_panic(expected = "joining local taints with different call info")]
    fn joining_different_call_infos_panics() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let leaf_port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let return_port = access_paths.get(AccessPath::from_root(Root::return_value()));

        let mut left = LocalTaint::from_frame(
            CallInfo::declaration(leaf_port),
            Frame::leaf(kind),
        );
        let right = LocalTaint::from_frame(
            CallInfo::declaration(return_port),
            Frame::leaf(kind),
        );
        left.join_with(right);
    }

    #[test]
    fn attach_position_moves_user_features_to_local() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let positions = crate::ir::Positions::new();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let leaf_port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let mut frame = Frame::leaf(kind);
        frame.add_user_features(&crate::domains::FeatureSet::singleton(
            crate::domains::Feature::new(strings.get_or_intern("via-user")),
        ));
        let taint = LocalTaint::from_frame(CallInfo::declaration(leaf_port), frame);

        let position = positions.get("Foo.java", 7);
        let attached = taint.attach_position(position);

        assert_eq!(attached.call_kind(), Some(CallKind::Origin));
        assert_eq!(attached.call_position(), Some(position));
        assert!(!attached.locally_inferred_features().is_bottom());
        attached.visit_frames(|_, frame| {
            assert!(frame.user_features().is_empty());
            assert_eq!(frame.distance(), 0);
        });
    }
}
