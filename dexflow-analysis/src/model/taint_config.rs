//! Declared taint entries: the validated form model JSON lowers into.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::access::{AccessPath, Root};
use crate::context::AnalysisContext;
use crate::domains::{
    AbstractDomain, CallInfo, CanonicalNameSet, CollapseDepth, FeatureSet, Frame,
    PathTree, Taint,
};
use crate::kinds::{KindHandle, SanitizerKind, TransformDirection, TransformHandle};

/// One declared source or sink entry.
#[derive(Debug, Clone)]
pub struct TaintConfig {
    pub kind: KindHandle,
    pub user_features: FeatureSet,
    pub via_type_of_ports: SmallVec<[Root; 2]>,
    pub via_value_of_ports: SmallVec<[Root; 2]>,
    pub canonical_names: CanonicalNameSet,
}

impl TaintConfig {
    pub fn new(kind: KindHandle) -> Self {
        TaintConfig {
            kind,
            user_features: FeatureSet::bottom(),
            via_type_of_ports: SmallVec::new(),
            via_value_of_ports: SmallVec::new(),
            canonical_names: CanonicalNameSet::bottom(),
        }
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.user_features = features;
        self
    }

    pub fn with_via_type_of(mut self, ports: impl IntoIterator<Item = Root>) -> Self {
        self.via_type_of_ports = ports.into_iter().collect();
        self
    }

    pub fn with_via_value_of(mut self, ports: impl IntoIterator<Item = Root>) -> Self {
        self.via_value_of_ports = ports.into_iter().collect();
        self
    }

    pub fn with_canonical_names(mut self, names: CanonicalNameSet) -> Self {
        self.canonical_names = names;
        self
    }

    /// Lower into declaration taint.
    pub fn into_taint(self, context: &AnalysisContext) -> Taint {
        let callee_port = context.port(Root::leaf());
        let frame = Frame::new(
            self.kind,
            Default::default(),
            0,
            Default::default(),
            crate::domains::FeatureMayAlwaysSet::bottom(),
            self.user_features,
            self.via_type_of_ports,
            self.via_value_of_ports,
            self.canonical_names,
            PathTree::bottom(),
            FxHashSet::default(),
        );
        Taint::from_frame(CallInfo::declaration(callee_port), frame)
    }
}

/// A declared propagation: taint on `input_path` flows to the output
/// root of `kind`, written through `output_paths`.
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    pub input_path: AccessPath,
    pub kind: KindHandle,
    pub output_paths: PathTree<CollapseDepth>,
    pub user_features: FeatureSet,
}

impl PropagationConfig {
    pub fn new(input_path: AccessPath, kind: KindHandle) -> Self {
        debug_assert!(kind.is_propagation());
        PropagationConfig {
            input_path,
            kind,
            output_paths: PathTree::from_value(CollapseDepth::zero()),
            user_features: FeatureSet::bottom(),
        }
    }

    pub fn with_output_paths(mut self, output_paths: PathTree<CollapseDepth>) -> Self {
        self.output_paths = output_paths;
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.user_features = features;
        self
    }

    /// Lower into propagation taint.
    pub fn into_taint(self, context: &AnalysisContext) -> Taint {
        let callee_port = context.port(Root::leaf());
        let mut frame = Frame::propagation(self.kind, self.output_paths);
        frame.add_user_features(&self.user_features);
        Taint::from_frame(
            CallInfo::new(
                None,
                crate::domains::CallKind::Propagation,
                callee_port,
                None,
            ),
            frame,
        )
    }
}

/// A sanitizer attached to a model: erases matching kinds flowing
/// through the method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sanitizer {
    pub sanitizer_kind: SanitizerKind,
    /// `None` sanitizes every kind.
    pub kinds: Option<BTreeSet<KindHandle>>,
}

impl Sanitizer {
    pub fn all(sanitizer_kind: SanitizerKind) -> Self {
        Sanitizer {
            sanitizer_kind,
            kinds: None,
        }
    }

    pub fn of_kinds(
        sanitizer_kind: SanitizerKind,
        kinds: impl IntoIterator<Item = KindHandle>,
    ) -> Self {
        Sanitizer {
            sanitizer_kind,
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    /// Whether this sanitizer erases `kind` in the given direction.
    pub fn sanitizes(&self, kind: KindHandle, direction: TransformDirection) -> bool {
        let direction_matches = match self.sanitizer_kind {
            SanitizerKind::Sources => direction == TransformDirection::Forward,
            SanitizerKind::Sinks => direction == TransformDirection::Backward,
            SanitizerKind::Propagations => true,
        };
        direction_matches
            && self
                .kinds
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&kind.discard_transforms()))
    }

    /// The transform this sanitizer contributes to a kind's trace.
    pub fn to_transform(&self, context: &AnalysisContext) -> TransformHandle {
        context
            .transforms
            .sanitizer(self.sanitizer_kind, self.kinds.clone())
    }
}

/// The sanitizers of a model, deduplicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizerSet {
    sanitizers: Vec<Sanitizer>,
}

impl SanitizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sanitizer: Sanitizer) {
        if !self.sanitizers.contains(&sanitizer) {
            self.sanitizers.push(sanitizer);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sanitizer> {
        self.sanitizers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.sanitizers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sanitizers.len()
    }

    pub fn join_with(&mut self, other: &SanitizerSet) {
        for sanitizer in &other.sanitizers {
            self.add(sanitizer.clone());
        }
    }

    pub fn is_subset(&self, other: &SanitizerSet) -> bool {
        self.sanitizers
            .iter()
            .all(|sanitizer| other.sanitizers.contains(sanitizer))
    }

    pub fn has_kind(&self, sanitizer_kind: SanitizerKind) -> bool {
        self.sanitizers
            .iter()
            .any(|sanitizer| sanitizer.sanitizer_kind == sanitizer_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lowers_to_declaration_taint() {
        let context = AnalysisContext::for_test();
        let kind = context.kinds.named(context.str("Secret"));

        let taint = TaintConfig::new(kind)
            .with_features(context.feature_set(&["via-user"]))
            .into_taint(&context);

        assert_eq!(taint.num_frames(), 1);
        taint.visit_frames(|call_info, frame| {
            assert!(call_info.call_kind().is_declaration());
            assert_eq!(frame.kind(), Some(kind));
            assert_eq!(frame.distance(), 0);
            assert!(!frame.user_features().is_empty());
        });
    }

    #[test]
    fn sanitizer_scope() {
        let context = AnalysisContext::for_test();
        let secret = context.kinds.named(context.str("Secret"));
        let other = context.kinds.named(context.str("Other"));

        let all = Sanitizer::all(SanitizerKind::Sources);
        assert!(all.sanitizes(secret, TransformDirection::Forward));
        assert!(!all.sanitizes(secret, TransformDirection::Backward));

        let scoped = Sanitizer::of_kinds(SanitizerKind::Sinks, [secret]);
        assert!(scoped.sanitizes(secret, TransformDirection::Backward));
        assert!(!scoped.sanitizes(other, TransformDirection::Backward));
    }

    #[test]
    fn sanitizer_set_deduplicates() {
        let mut set = SanitizerSet::new();
        set.add(Sanitizer::all(SanitizerKind::Sources));
        set.add(Sanitizer::all(SanitizerKind::Sources));
        assert_eq!(set.len(), 1);
    }
}
