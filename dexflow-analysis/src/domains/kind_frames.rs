//! `KindFrames`: the frames of a single kind, partitioned by class
//! interval context.

use lasso::ThreadedRodeo;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::call_info::CallInfo;
use super::features::{FeatureMayAlwaysSet, FeatureSet};
use super::frame::Frame;
use super::interval::{CallClassIntervalContext, ClassInterval};
use super::lattice::AbstractDomain;
use super::origin::Origin;
use super::path_tree::PathTree;
use crate::ir::MethodHandle;
use crate::kinds::{
    Kind, KindFactory, KindHandle, TransformDirection, TransformList,
    TransformListHandle, TransformsFactory,
};

/// Everything a call site supplies to `propagate`.
pub struct CallSiteContext<'a> {
    pub strings: &'a ThreadedRodeo,
    pub kinds: &'a KindFactory,
    pub transforms: &'a TransformsFactory,
    pub maximum_source_sink_distance: u32,
    pub source_register_types: &'a [Option<String>],
    pub source_constant_arguments: &'a [Option<String>],
    pub class_interval_context: CallClassIntervalContext,
    pub caller_class_interval: ClassInterval,
}

/// Map from class-interval context to `Frame`, all of one kind.
#[derive(Debug, Clone)]
pub struct KindFrames {
    kind: Option<KindHandle>,
    frames: FxHashMap<CallClassIntervalContext, Frame>,
}

impl KindFrames {
    pub fn from_frame(frame: Frame) -> Self {
        let mut frames = KindFrames::bottom();
        frames.add(frame);
        frames
    }

    pub fn kind(&self) -> Option<KindHandle> {
        self.kind
    }

    pub fn add(&mut self, frame: Frame) {
        let Some(frame_kind) = frame.kind() else {
            return;
        };
        match self.kind {
            None => self.kind = Some(frame_kind),
            Some(kind) => debug_assert_eq!(kind, frame_kind),
        }
        self.frames
            .entry(frame.class_interval_context())
            .or_insert_with(Frame::bottom)
            .join_with(frame);
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn visit(&self, mut visitor: impl FnMut(&Frame)) {
        for frame in self.frames.values() {
            visitor(frame);
        }
    }

    pub fn transform(&mut self, f: impl Fn(Frame) -> Frame) {
        let frames = std::mem::take(&mut self.frames);
        self.set_to_bottom();
        for (_, frame) in frames {
            let new_frame = f(frame);
            if !new_frame.is_bottom() {
                self.add(new_frame);
            }
        }
    }

    pub fn filter(&mut self, predicate: impl Fn(&Frame) -> bool) {
        self.frames.retain(|_, frame| predicate(frame));
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    /// Frame-wise difference: a frame covered by the other side's frame
    /// for the same interval context is dropped.
    pub fn difference_with(&mut self, other: &KindFrames) {
        debug_assert!(
            other.is_bottom() || self.is_bottom() || self.kind == other.kind
        );
        self.frames.retain(|interval, frame| {
            other
                .frames
                .get(interval)
                .map_or(true, |other_frame| !frame.leq(other_frame))
        });
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    pub fn add_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        for frame in self.frames.values_mut() {
            frame.add_inferred_features(features);
        }
    }

    /// Join all frames into one with the default interval context.
    pub fn collapse_class_intervals(&mut self) {
        if self.is_bottom() {
            return;
        }
        let mut collapsed = Frame::bottom();
        for (_, frame) in std::mem::take(&mut self.frames) {
            collapsed.join_with(frame.with_interval(CallClassIntervalContext::default_context()));
        }
        self.frames
            .insert(CallClassIntervalContext::default_context(), collapsed);
    }

    pub fn with_kind(&self, kind: KindHandle) -> KindFrames {
        let mut result = KindFrames::bottom();
        self.visit(|frame| result.add(frame.with_kind(kind)));
        result
    }

    /// Propagate the frames of this kind from the callee into the
    /// caller at one call site. Returns bottom when every frame is
    /// dropped (distance cap or empty interval intersection).
    pub fn propagate(
        &self,
        callee: Option<MethodHandle>,
        propagated_call_info: &CallInfo,
        locally_inferred_features: &FeatureMayAlwaysSet,
        context: &CallSiteContext<'_>,
    ) -> KindFrames {
        let Some(kind) = self.kind else {
            return KindFrames::bottom();
        };

        let propagated_kind = propagate_kind(kind, context);
        let mut propagated = KindFrames::bottom();

        for frame in self.frames.values() {
            if frame.distance() >= context.maximum_source_sink_distance {
                continue;
            }

            let propagated_interval =
                propagate_interval(frame, propagated_call_info, context);
            if propagated_interval.callee_interval().is_bottom() {
                // Intervals do not intersect; this callee cannot be
                // reached from the caller's type context.
                continue;
            }

            let is_origin = propagated_call_info.call_kind().is_origin();

            // Features: user features surface at the origin frame; past
            // the origin they fold into the inferred set.
            let mut propagated_inferred = locally_inferred_features.clone();
            if propagated_inferred.is_bottom() {
                propagated_inferred = FeatureMayAlwaysSet::empty();
            }
            let mut propagated_user = FeatureSet::bottom();
            if is_origin {
                debug_assert!(
                    frame.inferred_features().is_bottom()
                        || frame.inferred_features().is_empty()
                );
                propagated_user = frame.user_features().clone();
            } else {
                propagated_inferred.add(&frame.features());
            }

            if callee.is_some() {
                for feature in frame.materialize_via_type_of_ports(
                    context.source_register_types,
                    context.strings,
                ) {
                    propagated_user.add(feature);
                }
                for feature in frame.materialize_via_value_of_ports(
                    context.source_constant_arguments,
                    context.strings,
                ) {
                    propagated_user.add(feature);
                }
            }

            // Canonical names instantiate against the resolved callee
            // and feed the origins for cross-codebase traces.
            let mut propagated_origins = frame.origins().clone();
            let mut propagated_canonical_names = frame.canonical_names().clone();
            if let Some(callee) = callee {
                if propagated_canonical_names.iter().any(|name| name.is_template()) {
                    propagated_canonical_names = propagated_canonical_names
                        .instantiate(&callee.signature(), context.strings);
                    for name in propagated_canonical_names.iter() {
                        propagated_origins.add(Origin::Crtex {
                            canonical_name: name.value(),
                            port: propagated_call_info.callee_port(),
                        });
                    }
                }
            }

            // Origins are the leaves of a trace and restart at zero.
            let propagated_distance = if is_origin { 0 } else { frame.distance() + 1 };
            debug_assert!(propagated_distance <= context.maximum_source_sink_distance);

            let mut propagated_output_paths = PathTree::bottom();
            if propagated_call_info.call_kind().is_propagation_with_trace() {
                propagated_output_paths.join_with(frame.output_paths().clone());
            }

            let propagated_frame = Frame::new(
                propagated_kind,
                propagated_interval,
                propagated_distance,
                propagated_origins,
                propagated_inferred,
                propagated_user,
                SmallVec::new(),
                SmallVec::new(),
                propagated_canonical_names,
                propagated_output_paths,
                frame.extra_traces().clone(),
            );
            propagated.add(propagated_frame);
        }

        propagated
    }

    /// Prepend a sanitizer transform. Returns bottom when the sanitizer
    /// proves the kind erased in the given direction.
    pub fn add_sanitize_transform(
        &self,
        sanitizer: crate::kinds::TransformHandle,
        direction: TransformDirection,
        kinds: &KindFactory,
        transforms: &TransformsFactory,
    ) -> KindFrames {
        let Some(kind) = self.kind else {
            return KindFrames::bottom();
        };

        let mut new_transforms = TransformList::new(vec![sanitizer]);
        if new_transforms.sanitizes(kind.discard_transforms(), direction) {
            return KindFrames::bottom();
        }

        let mut base_kind = kind;
        let mut global_transforms = None;
        if let Kind::Transform {
            base,
            local_transforms,
            global_transforms: existing_global,
        } = &*kind
        {
            if let Some(existing) = local_transforms {
                new_transforms = TransformList::new(
                    new_transforms.iter().chain(existing.iter()).collect(),
                );
            }
            global_transforms = *existing_global;
            base_kind = *base;
        }

        let local_transforms = transforms.canonicalize(&new_transforms);
        let new_kind = kinds.transform_kind(base_kind, local_transforms, global_transforms);
        self.with_kind(new_kind)
    }

    /// Apply a transform list to the kind, filtering sanitizers that
    /// cannot match and dropping the frames when sanitized.
    pub fn apply_transform(
        &self,
        local_transforms: TransformListHandle,
        direction: TransformDirection,
        kinds: &KindFactory,
        transforms: &TransformsFactory,
    ) -> KindFrames {
        let Some(kind) = self.kind else {
            return KindFrames::bottom();
        };

        if local_transforms.sanitizes(kind.discard_transforms(), direction) {
            return KindFrames::bottom();
        }

        let new_kind = match &*kind {
            Kind::Transform {
                base,
                local_transforms: existing_local,
                global_transforms,
            } => {
                let mut applied = (*local_transforms).clone();
                if !base.is_propagation() {
                    applied = transforms.discard_unmatched_sanitizers(&applied, direction);
                }
                if !applied.is_empty() {
                    if let Some(global) = global_transforms {
                        let existing_has_non_sanitize = existing_local
                            .map_or(false, |list| list.has_non_sanitize_transform());
                        if !existing_has_non_sanitize {
                            applied = transforms.filter_global_sanitizers(&applied, *global);
                        }
                    }
                }
                let combined = match existing_local {
                    Some(existing) => TransformList::new(
                        applied.iter().chain(existing.iter()).collect(),
                    ),
                    None => applied,
                };
                let local = transforms.canonicalize(&combined);
                kinds.transform_kind(*base, local, *global_transforms)
            }
            _ if kind.is_propagation() => {
                // Track transform hops of propagations as global
                // transforms so the trace reconstruction can follow.
                kinds.transform_kind(kind, None, Some(local_transforms))
            }
            _ => {
                let applied = transforms
                    .discard_unmatched_sanitizers(&local_transforms, direction);
                if applied.is_empty() {
                    return self.clone();
                }
                let local = transforms.canonicalize(&applied);
                kinds.transform_kind(kind, local, None)
            }
        };

        self.with_kind(new_kind)
    }
}

/// Local transforms of the callee become global transforms for the
/// caller.
fn propagate_kind(kind: KindHandle, context: &CallSiteContext<'_>) -> KindHandle {
    if let Kind::Transform {
        base,
        local_transforms,
        global_transforms,
    } = &*kind
    {
        return context.kinds.transform_kind(
            *base,
            None,
            context
                .transforms
                .concat(*local_transforms, *global_transforms),
        );
    }
    kind
}

fn propagate_interval(
    frame: &Frame,
    propagated_call_info: &CallInfo,
    context: &CallSiteContext<'_>,
) -> CallClassIntervalContext {
    let frame_interval = frame.class_interval_context();
    if propagated_call_info.call_kind().is_origin() {
        // The declaration is the base case: the origin frame lives in
        // the caller's class context and preserves it.
        debug_assert!(frame_interval.is_default());
        return CallClassIntervalContext::new(context.caller_class_interval, true);
    }

    let mut propagated_interval = context.class_interval_context.callee_interval();
    if frame_interval.preserves_type_context() {
        // A this.* call or declared source/sink: the receiver's type
        // must be a subtype of the class the frame was created in.
        propagated_interval = frame_interval
            .callee_interval()
            .meet(context.class_interval_context.callee_interval());
    }

    CallClassIntervalContext::new(
        propagated_interval,
        context.class_interval_context.preserves_type_context(),
    )
}

impl AbstractDomain for KindFrames {
    fn bottom() -> Self {
        KindFrames {
            kind: None,
            frames: FxHashMap::default(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.frames.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        debug_assert!(
            self.is_bottom() || other.is_bottom() || self.kind == other.kind
        );
        self.frames.iter().all(|(interval, frame)| {
            other
                .frames
                .get(interval)
                .map_or(false, |other_frame| frame.leq(other_frame))
        })
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
        for (interval, frame) in other.frames {
            self.frames
                .entry(interval)
                .or_insert_with(Frame::bottom)
                .join_with(frame);
        }
    }

    fn meet_with(&mut self, other: Self) {
        if self.is_bottom() {
            return;
        }
        if other.is_bottom() {
            self.set_to_bottom();
            return;
        }
        debug_assert_eq!(self.kind, other.kind);
        let mut frames = FxHashMap::default();
        for (interval, mut frame) in std::mem::take(&mut self.frames) {
            if let Some(other_frame) = other.frames.get(&interval) {
                frame.meet_with(other_frame.clone());
                if !frame.is_bottom() {
                    frames.insert(interval, frame);
                }
            }
        }
        self.frames = frames;
        if self.frames.is_empty() {
            self.set_to_bottom();
        }
    }

    fn set_to_bottom(&mut self) {
        self.kind = None;
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, AccessPathFactory, Root};
    use crate::domains::call_info::CallKind;

    fn setup() -> (ThreadedRodeo, KindFactory, TransformsFactory, AccessPathFactory) {
        (
            ThreadedRodeo::new(),
            KindFactory::new(),
            TransformsFactory::new(),
            AccessPathFactory::new(),
        )
    }

    #[test]
    fn frames_partition_by_interval_context() {
        let (strings, kinds, _, _) = setup();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let mut frames = KindFrames::bottom();
        frames.add(Frame::leaf(kind));
        frames.add(
            Frame::leaf(kind)
                .with_interval(CallClassIntervalContext::new(ClassInterval::new(1, 4), false)),
        );
        assert_eq!(frames.num_frames(), 2);
    }

    #[test]
    fn propagate_increments_distance_and_caps_it() {
        let (strings, kinds, transforms, access_paths) = setup();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let context = CallSiteContext {
            strings: &strings,
            kinds: &kinds,
            transforms: &transforms,
            maximum_source_sink_distance: 2,
            source_register_types: &[],
            source_constant_arguments: &[],
            class_interval_context: CallClassIntervalContext::default_context(),
            caller_class_interval: ClassInterval::top(),
        };

        let port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let call_site_info = CallInfo::new(None, CallKind::CallSite, port, None);

        let frames = KindFrames::from_frame(Frame::leaf(kind).with_distance(1));
        let propagated = frames.propagate(
            None,
            &call_site_info,
            &FeatureMayAlwaysSet::bottom(),
            &context,
        );
        let mut distance = None;
        propagated.visit(|frame| distance = Some(frame.distance()));
        assert_eq!(distance, Some(2));

        // At the cap, the frame is dropped entirely.
        let capped = KindFrames::from_frame(Frame::leaf(kind).with_distance(2));
        assert!(capped
            .propagate(None, &call_site_info, &FeatureMayAlwaysSet::bottom(), &context)
            .is_bottom());
    }

    #[test]
    fn propagate_drops_empty_interval_intersection() {
        let (strings, kinds, transforms, access_paths) = setup();
        let kind = kinds.named(strings.get_or_intern("Secret"));

        let context = CallSiteContext {
            strings: &strings,
            kinds: &kinds,
            transforms: &transforms,
            maximum_source_sink_distance: 10,
            source_register_types: &[],
            source_constant_arguments: &[],
            // Receiver typed in [5, 6].
            class_interval_context: CallClassIntervalContext::new(
                ClassInterval::new(5, 6),
                false,
            ),
            caller_class_interval: ClassInterval::top(),
        };

        let port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let call_site_info = CallInfo::new(None, CallKind::CallSite, port, None);

        // Frame created under [1, 2] with the type context preserved.
        let frames = KindFrames::from_frame(Frame::leaf(kind).with_interval(
            CallClassIntervalContext::new(ClassInterval::new(1, 2), true),
        ));
        assert!(frames
            .propagate(None, &call_site_info, &FeatureMayAlwaysSet::bottom(), &context)
            .is_bottom());
    }

    #[test]
    fn propagate_promotes_local_transforms_to_global() {
        let (strings, kinds, transforms, access_paths) = setup();
        let base = kinds.named(strings.get_or_intern("Secret"));
        let decode = transforms.named(strings.get_or_intern("decode"));
        let local = transforms.create(TransformList::new(vec![decode]));
        let wrapped = kinds.transform_kind(base, local, None);

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

        let port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let call_site_info = CallInfo::new(None, CallKind::CallSite, port, None);

        let frames = KindFrames::from_frame(Frame::leaf(wrapped));
        let propagated = frames.propagate(
            None,
            &call_site_info,
            &FeatureMayAlwaysSet::bottom(),
            &context,
        );

        let propagated_kind = propagated.kind().unwrap();
        match &*propagated_kind {
            Kind::Transform {
                local_transforms,
                global_transforms,
                ..
            } => {
                assert!(local_transforms.is_none());
                assert_eq!(*global_transforms, local);
            }
            other => panic!("expected a transform kind, got {other:?}"),
        }
    }
}
