//! End-to-end scenarios: declared models + program IR through the
//! interprocedural fixpoint.

use serde_json::json;

use dexflow_analysis::access::{AccessPath, Root};
use dexflow_analysis::context::AnalysisContext;
use dexflow_analysis::domains::{AbstractDomain, Origin};
use dexflow_analysis::interprocedural::run_analysis;
use dexflow_analysis::ir::{
    ControlFlowGraph, Instruction, InvokeKind, MethodHandle, Program, ProgramBuilder,
};
use dexflow_analysis::kinds::SanitizerKind;
use dexflow_analysis::model::json::model_to_json;
use dexflow_analysis::model::{Model, Sanitizer, TaintConfig};
use dexflow_analysis::registry::Registry;
use dexflow_analysis::rules::Rules;
use dexflow_core::cancellation::CancellationToken;
use dexflow_core::{Heuristics, Options};

fn test_context() -> AnalysisContext {
    let options = Options {
        sequential: true,
        ..Options::default()
    };
    AnalysisContext::new(options, Heuristics::default())
}

fn simple_rules(context: &AnalysisContext) -> Rules {
    Rules::from_json(
        &json!([
            {
                "name": "Secret to sink",
                "code": 1,
                "description": "Secret data reaches a sink",
                "sources": ["T"],
                "sinks": ["T"]
            }
        ]),
        context,
    )
    .unwrap()
}

/// `LS;.source:()LData;`, body-less, generating kind `T`.
fn declare_source(
    builder: &mut ProgramBuilder,
    context: &AnalysisContext,
    registry: &Registry,
) -> MethodHandle {
    let method = builder.method("LS;", "source", vec![], "LData;", true, None);
    let kind = context.kinds.named(context.str("T"));
    let mut model = Model::new(Some(method));
    model
        .add_generation(
            AccessPath::from_root(Root::return_value()),
            TaintConfig::new(kind),
            context,
        )
        .unwrap();
    registry.join(method, model);
    method
}

/// `LK;.sink:(LData;)V`, body-less, sinking kind `T` on argument 0.
fn declare_sink(
    builder: &mut ProgramBuilder,
    context: &AnalysisContext,
    registry: &Registry,
) -> MethodHandle {
    let method = builder.method("LK;", "sink", vec!["LData;".to_string()], "V", true, None);
    let kind = context.kinds.named(context.str("T"));
    let mut model = Model::new(Some(method));
    model
        .add_sink(
            AccessPath::from_root(Root::argument(0)),
            TaintConfig::new(kind),
            context,
        )
        .unwrap();
    registry.join(method, model);
    method
}

fn run(
    context: &AnalysisContext,
    program: &Program,
    registry: &Registry,
    rules: &Rules,
) {
    let cancellation = CancellationToken::new();
    run_analysis(context, program, registry, rules, &cancellation);
}

#[test]
fn trivial_flow_produces_exactly_one_issue() {
    let context = test_context();
    let registry = Registry::new();
    let mut builder = Program::builder();

    declare_source(&mut builder, &context, &registry);
    declare_sink(&mut builder, &context, &registry);

    // C.f() { sink(source()); }
    let mut cfg = ControlFlowGraph::builder();
    let line = |n| Some(context.positions.get("C.java", n));
    cfg.block(vec![
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LS;.source:()LData;".to_string(),
                args: vec![],
            },
            line(10),
        ),
        (Instruction::MoveResult { dest: 0 }, line(10)),
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LK;.sink:(LData;)V".to_string(),
                args: vec![0],
            },
            line(11),
        ),
        (Instruction::Return { src: None }, line(12)),
    ]);
    let caller = builder.method("LC;", "f", vec![], "V", true, Some(cfg.build()));

    let program = builder.build();
    let rules = simple_rules(&context);
    run(&context, &program, &registry, &rules);

    let model = registry.get(caller).expect("caller model");
    assert_eq!(model.issues().len(), 1);

    let issue = model.issues().iter_sorted()[0];
    assert_eq!(issue.rule_code, 1);
    assert_eq!(issue.callee, "LK;.sink:(LData;)V");
    assert_eq!(issue.position.unwrap().line(), 11);

    // Sources trace back to the declared source method.
    let mut source_origins = Vec::new();
    issue.sources.visit_frames(|_, frame| {
        for origin in frame.origins().iter() {
            if let Origin::Method { method, .. } = origin {
                source_origins.push(method.signature());
            }
        }
    });
    assert_eq!(source_origins, vec!["LS;.source:()LData;".to_string()]);

    // Sinks trace back to the declared sink method.
    let mut sink_origins = Vec::new();
    issue.sinks.visit_frames(|_, frame| {
        for origin in frame.origins().iter() {
            if let Origin::Method { method, .. } = origin {
                sink_origins.push(method.signature());
            }
        }
    });
    assert_eq!(sink_origins, vec!["LK;.sink:(LData;)V".to_string()]);
}

#[test]
fn flow_through_declared_propagation() {
    let context = test_context();
    let registry = Registry::new();
    let mut builder = Program::builder();

    declare_source(&mut builder, &context, &registry);
    declare_sink(&mut builder, &context, &registry);

    // Data.propagation(Data): Argument(1) -> Return, body-less.
    let propagation_method = builder.method(
        "LData;",
        "propagation",
        vec!["LData;".to_string()],
        "LData;",
        false,
        None,
    );
    let mut model = Model::new(Some(propagation_method));
    model
        .add_propagation(
            dexflow_analysis::model::PropagationConfig::new(
                AccessPath::from_root(Root::argument(1)),
                context.kinds.local_return(),
            )
            .with_features(context.feature_set(&["via-propagation"])),
            &context,
        )
        .unwrap();
    registry.join(propagation_method, model);

    // C.g() { sink(new Data().propagation(source())); }
    let mut cfg = ControlFlowGraph::builder();
    let line = |n| Some(context.positions.get("C.java", n));
    cfg.block(vec![
        (
            Instruction::NewInstance {
                class: "LData;".to_string(),
            },
            line(20),
        ),
        (Instruction::MoveResult { dest: 5 }, line(20)),
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LS;.source:()LData;".to_string(),
                args: vec![],
            },
            line(21),
        ),
        (Instruction::MoveResult { dest: 0 }, line(21)),
        (
            Instruction::Invoke {
                kind: InvokeKind::Virtual,
                method: "LData;.propagation:(LData;)LData;".to_string(),
                args: vec![5, 0],
            },
            line(22),
        ),
        (Instruction::MoveResult { dest: 1 }, line(22)),
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LK;.sink:(LData;)V".to_string(),
                args: vec![1],
            },
            line(23),
        ),
        (Instruction::Return { src: None }, line(24)),
    ]);
    let caller = builder.method("LC;", "g", vec![], "V", true, Some(cfg.build()));

    let program = builder.build();
    let rules = simple_rules(&context);
    run(&context, &program, &registry, &rules);

    let model = registry.get(caller).expect("caller model");
    assert_eq!(model.issues().len(), 1);

    // The issue's source taint carries the propagation's feature.
    let issue = model.issues().iter_sorted()[0];
    let features = issue.sources.features_joined();
    let via_propagation = context.feature("via-propagation");
    assert!(
        features.always().contains(via_propagation)
            || features.may().contains(via_propagation)
    );
}

#[test]
fn global_sanitizer_blocks_the_flow() {
    let context = test_context();
    let registry = Registry::new();
    let mut builder = Program::builder();

    declare_source(&mut builder, &context, &registry);
    declare_sink(&mut builder, &context, &registry);

    let mut cfg = ControlFlowGraph::builder();
    cfg.block(vec![
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LS;.source:()LData;".to_string(),
                args: vec![],
            },
            None,
        ),
        (Instruction::MoveResult { dest: 0 }, None),
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LK;.sink:(LData;)V".to_string(),
                args: vec![0],
            },
            None,
        ),
        (Instruction::Return { src: None }, None),
    ]);
    let caller = builder.method("LC;", "f", vec![], "V", true, Some(cfg.build()));

    // The caller sanitizes all sources of kind T.
    let kind = context.kinds.named(context.str("T"));
    let mut caller_model = Model::new(Some(caller));
    caller_model.add_global_sanitizer(Sanitizer::of_kinds(SanitizerKind::Sources, [kind]));
    registry.join(caller, caller_model);

    let program = builder.build();
    let rules = simple_rules(&context);
    run(&context, &program, &registry, &rules);

    let model = registry.get(caller).expect("caller model");
    assert_eq!(model.issues().len(), 0);
    assert!(model.generations().is_bottom());
}

#[test]
fn class_intervals_filter_unreachable_overrides() {
    let context = test_context();
    let registry = Registry::new();
    let mut builder = Program::builder();

    declare_sink(&mut builder, &context, &registry);

    builder.class("LBase;", None);
    builder.class("LA;", Some("LBase;"));
    builder.class("LB;", Some("LBase;"));

    // Base.m() generates nothing; the overrides A.m() and B.m()
    // generate T and U respectively.
    builder.method("LBase;", "m", vec![], "LData;", false, None);
    let a_m = builder.method("LA;", "m", vec![], "LData;", false, None);
    let b_m = builder.method("LB;", "m", vec![], "LData;", false, None);

    let kind_t = context.kinds.named(context.str("T"));
    let kind_u = context.kinds.named(context.str("U"));
    let mut a_model = Model::new(Some(a_m));
    a_model
        .add_generation(
            AccessPath::from_root(Root::return_value()),
            TaintConfig::new(kind_t),
            &context,
        )
        .unwrap();
    registry.join(a_m, a_model);
    let mut b_model = Model::new(Some(b_m));
    b_model
        .add_generation(
            AccessPath::from_root(Root::return_value()),
            TaintConfig::new(kind_u),
            &context,
        )
        .unwrap();
    registry.join(b_m, b_model);

    // C.h() { Base receiver = new A(); sink(receiver.m()); }
    // The receiver is an A, so B.m's contribution must be filtered out.
    let mut cfg = ControlFlowGraph::builder();
    cfg.block(vec![
        (
            Instruction::NewInstance {
                class: "LA;".to_string(),
            },
            None,
        ),
        (Instruction::MoveResult { dest: 5 }, None),
        (
            Instruction::Invoke {
                kind: InvokeKind::Virtual,
                method: "LBase;.m:()LData;".to_string(),
                args: vec![5],
            },
            None,
        ),
        (Instruction::MoveResult { dest: 0 }, None),
        (
            Instruction::Invoke {
                kind: InvokeKind::Static,
                method: "LK;.sink:(LData;)V".to_string(),
                args: vec![0],
            },
            None,
        ),
        (Instruction::Return { src: None }, None),
    ]);
    let caller = builder.method("LC;", "h", vec![], "V", true, Some(cfg.build()));

    let program = builder.build();
    let rules = Rules::from_json(
        &json!([
            { "name": "T rule", "code": 1, "description": "", "sources": ["T"], "sinks": ["T"] },
            { "name": "U rule", "code": 2, "description": "", "sources": ["U"], "sinks": ["T"] }
        ]),
        &context,
    )
    .unwrap();
    run(&context, &program, &registry, &rules);

    let model = registry.get(caller).expect("caller model");
    let issues = model.issues().iter_sorted();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].rule_code, 1);
}

#[test]
fn widening_caps_generation_leaves() {
    let mut heuristics = Heuristics::default();
    heuristics.k_generation_max_output_path_leaves = 50;
    let context = AnalysisContext::new(Options::default(), heuristics);

    let kind = context.kinds.named(context.str("T"));
    let mut model = Model::new(None);
    for i in 0..200 {
        let port = context
            .parse_port(&format!("Argument(0).f{i}"))
            .unwrap();
        model
            .add_generation(
                AccessPath::new(port.root(), port.path().clone()),
                TaintConfig::new(kind),
                &context,
            )
            .unwrap();
    }

    model.approximate(&context);

    let tree = model.generations().tree_at(Root::argument(0)).unwrap();
    assert!(tree.leaf_count() <= 50);

    // Every collapsed leaf carries the broadening feature.
    let broadening = context.feature("via-broadening");
    for (_, taint) in model.generations().elements() {
        let features = taint.features_joined();
        assert!(
            features.always().contains(broadening) || features.may().contains(broadening)
        );
    }
}

#[test]
fn mutually_recursive_methods_reach_an_idempotent_fixpoint() {
    fn build_run() -> serde_json::Value {
        let context = test_context();
        let registry = Registry::new();
        let mut builder = Program::builder();

        // A.f(x) { if (..) return x; else return B.g(x); } and the
        // mirror image in B.g.
        for (class, callee) in [("LA;", "LB;.g:(LData;)LData;"), ("LB;", "LA;.f:(LData;)LData;")]
        {
            let mut cfg = ControlFlowGraph::builder();
            let entry = cfg.block(vec![(Instruction::LoadParam { dest: 0 }, None)]);
            let direct = cfg.block(vec![(Instruction::Return { src: Some(0) }, None)]);
            let recursive = cfg.block(vec![
                (
                    Instruction::Invoke {
                        kind: InvokeKind::Static,
                        method: callee.to_string(),
                        args: vec![0],
                    },
                    None,
                ),
                (Instruction::MoveResult { dest: 1 }, None),
                (Instruction::Return { src: Some(1) }, None),
            ]);
            cfg.edge(entry, direct);
            cfg.edge(entry, recursive);
            let name = if class == "LA;" { "f" } else { "g" };
            builder.method(
                class,
                name,
                vec!["LData;".to_string()],
                "LData;",
                true,
                Some(cfg.build()),
            );
        }

        let program = builder.build();
        let rules = Rules::new(vec![]);
        let cancellation = CancellationToken::new();
        let statistics =
            run_analysis(&context, &program, &registry, &rules, &cancellation);
        assert!(statistics.errors.is_empty());

        let models: Vec<serde_json::Value> = registry
            .sorted_models()
            .iter()
            .map(|(_, model)| model_to_json(model, &context))
            .collect();
        serde_json::Value::Array(models)
    }

    let first = build_run();
    let second = build_run();
    assert_eq!(first, second);

    // Both methods learned the pass-through propagation.
    let models = first.as_array().unwrap();
    assert_eq!(models.len(), 2);
    for model in models {
        assert!(
            model.get("propagation").is_some(),
            "missing propagation in {model}"
        );
    }
}
