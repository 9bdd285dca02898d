//! Property tests for the lattice laws every domain must satisfy:
//! `x.leq(y) ⇔ x.join(y) == y`, join commutativity/associativity,
//! bottom absorption, and widening termination.

use proptest::prelude::*;

use dexflow_analysis::access::{AccessPath, Path, PathElement, Root};
use dexflow_analysis::context::AnalysisContext;
use dexflow_analysis::domains::{
    AbstractDomain, CallInfo, CollapseDepth, Feature, FeatureMayAlwaysSet, FeatureSet,
    Frame, PathTree, Taint, UpdateKind,
};

/// A buildable description of a `FeatureMayAlwaysSet`; values are
/// constructed inside the test body because factories are per-case.
#[derive(Debug, Clone)]
struct FeaturesDescription {
    bottom: bool,
    always: Vec<u8>,
    may: Vec<u8>,
}

fn features_description() -> impl Strategy<Value = FeaturesDescription> {
    (
        any::<bool>(),
        prop::collection::vec(0u8..6, 0..4),
        prop::collection::vec(0u8..6, 0..4),
    )
        .prop_map(|(bottom, always, may)| FeaturesDescription { bottom, always, may })
}

fn build_features(
    context: &AnalysisContext,
    description: &FeaturesDescription,
) -> FeatureMayAlwaysSet {
    if description.bottom {
        return FeatureMayAlwaysSet::bottom();
    }
    let feature = |id: &u8| Feature::new(context.str(&format!("feature-{id}")));
    let mut set = FeatureMayAlwaysSet::make_always(FeatureSet::from_iter(
        description.always.iter().map(feature),
    ));
    set.add_may(&FeatureSet::from_iter(description.may.iter().map(feature)));
    set
}

/// A buildable description of a small `Taint` value.
#[derive(Debug, Clone)]
struct TaintDescription {
    /// (kind id, distance) per frame.
    frames: Vec<(u8, u8)>,
}

fn taint_description() -> impl Strategy<Value = TaintDescription> {
    prop::collection::vec((0u8..4, 0u8..4), 0..4)
        .prop_map(|frames| TaintDescription { frames })
}

fn build_taint(context: &AnalysisContext, description: &TaintDescription) -> Taint {
    let mut taint = Taint::bottom();
    let port = context.port(Root::leaf());
    for (kind_id, distance) in &description.frames {
        let kind = context.kinds.named(context.str(&format!("Kind{kind_id}")));
        taint.add_frame(
            CallInfo::declaration(port),
            Frame::leaf(kind).with_distance(*distance as u32),
        );
    }
    taint
}

/// A buildable description of a `PathTree<CollapseDepth>`.
#[derive(Debug, Clone)]
struct TreeDescription {
    /// (path element ids, depth) per write.
    writes: Vec<(Vec<u8>, u8)>,
}

fn tree_description() -> impl Strategy<Value = TreeDescription> {
    prop::collection::vec(
        (prop::collection::vec(0u8..3, 0..3), 0u8..6),
        0..5,
    )
    .prop_map(|writes| TreeDescription { writes })
}

fn build_tree(
    context: &AnalysisContext,
    description: &TreeDescription,
) -> PathTree<CollapseDepth> {
    let mut tree = PathTree::bottom();
    for (elements, depth) in &description.writes {
        let path: Path = elements
            .iter()
            .map(|id| PathElement::field(context.str(&format!("f{id}"))))
            .collect();
        tree.write(&path, CollapseDepth::new(*depth as u32), UpdateKind::Weak);
    }
    tree
}

proptest! {
    #[test]
    fn features_leq_iff_join_is_identity(
        a in features_description(),
        b in features_description(),
    ) {
        let context = AnalysisContext::for_test();
        let a = build_features(&context, &a);
        let b = build_features(&context, &b);

        let joined = a.clone().join(b.clone());
        prop_assert_eq!(a.leq(&b), joined.equals(&b));
        prop_assert!(a.leq(&joined));
        prop_assert!(b.leq(&joined));
    }

    #[test]
    fn features_join_is_commutative_and_idempotent(
        a in features_description(),
        b in features_description(),
    ) {
        let context = AnalysisContext::for_test();
        let a = build_features(&context, &a);
        let b = build_features(&context, &b);

        let ab = a.clone().join(b.clone());
        let ba = b.clone().join(a.clone());
        prop_assert!(ab.equals(&ba));
        prop_assert!(a.clone().join(a.clone()).equals(&a));
        prop_assert!(a.clone().join(FeatureMayAlwaysSet::bottom()).equals(&a));
    }

    #[test]
    fn taint_leq_iff_join_is_identity(
        a in taint_description(),
        b in taint_description(),
    ) {
        let context = AnalysisContext::for_test();
        let a = build_taint(&context, &a);
        let b = build_taint(&context, &b);

        let joined = a.clone().join(b.clone());
        prop_assert_eq!(a.leq(&b), joined.equals(&b));
        prop_assert!(a.leq(&joined));
        prop_assert!(b.leq(&joined));
    }

    #[test]
    fn taint_join_is_commutative_associative(
        a in taint_description(),
        b in taint_description(),
        c in taint_description(),
    ) {
        let context = AnalysisContext::for_test();
        let a = build_taint(&context, &a);
        let b = build_taint(&context, &b);
        let c = build_taint(&context, &c);

        let ab_c = a.clone().join(b.clone()).join(c.clone());
        let a_bc = a.clone().join(b.clone().join(c.clone()));
        prop_assert!(ab_c.equals(&a_bc));

        let ab = a.clone().join(b.clone());
        let ba = b.clone().join(a.clone());
        prop_assert!(ab.equals(&ba));

        prop_assert!(a.clone().join(Taint::bottom()).equals(&a));
    }

    #[test]
    fn tree_leq_iff_join_is_identity(
        a in tree_description(),
        b in tree_description(),
    ) {
        let context = AnalysisContext::for_test();
        let a = build_tree(&context, &a);
        let b = build_tree(&context, &b);

        let joined = a.clone().join(b.clone());
        prop_assert_eq!(a.leq(&b), joined.equals(&b));
        prop_assert!(a.leq(&joined));
        prop_assert!(b.leq(&joined));
    }

    #[test]
    fn tree_reads_cover_writes(description in tree_description()) {
        let context = AnalysisContext::for_test();
        let tree = build_tree(&context, &description);

        // Whatever was written at a path is visible when reading it.
        for (elements, depth) in &description.writes {
            let path: Path = elements
                .iter()
                .map(|id| PathElement::field(context.str(&format!("f{id}"))))
                .collect();
            let read = tree.read(&path);
            prop_assert!(
                CollapseDepth::new(*depth as u32).leq(read.root_value()),
                "written value lost at {path:?}"
            );
        }
    }

    #[test]
    fn taint_propagate_respects_distance_cap(
        description in taint_description(),
        cap in 1u32..4,
    ) {
        let context = AnalysisContext::for_test();
        let taint = build_taint(&context, &description);

        let call_site_context = dexflow_analysis::domains::CallSiteContext {
            strings: &context.strings,
            kinds: &context.kinds,
            transforms: &context.transforms,
            maximum_source_sink_distance: cap,
            source_register_types: &[],
            source_constant_arguments: &[],
            class_interval_context: Default::default(),
            caller_class_interval: dexflow_analysis::domains::ClassInterval::top(),
        };
        let port = context.access_paths.get(AccessPath::from_root(Root::return_value()));
        let propagated = taint.propagate(None, port, None, &call_site_context);
        prop_assert!(propagated.distance() <= cap);
    }
}
