//! Model JSON: config-schema loading and dump/load round-trips.

use serde_json::json;

use dexflow_analysis::access::{AccessPath, Root};
use dexflow_analysis::context::AnalysisContext;
use dexflow_analysis::domains::AbstractDomain;
use dexflow_analysis::ir::{Fields, Method, Methods};
use dexflow_analysis::model::json::{model_from_config_json, model_from_json, model_to_json};
use dexflow_core::errors::ModelValidationError;
use dexflow_core::{Heuristics, Options};

fn context() -> AnalysisContext {
    AnalysisContext::new(Options::default(), Heuristics::default())
}

fn methods_with(signature_parts: &[(&str, &str, Vec<&str>, &str, bool)]) -> Methods {
    let mut methods = Methods::new();
    for (class, name, parameters, return_type, is_static) in signature_parts {
        methods.create(
            Method::new(
                class.to_string(),
                name.to_string(),
                parameters.iter().map(|p| p.to_string()).collect(),
                return_type.to_string(),
                *is_static,
            ),
            None,
        );
    }
    methods
}

#[test]
fn config_schema_loads_generations_sinks_and_propagation() {
    let context = context();
    let methods = methods_with(&[(
        "LFoo;",
        "process",
        vec!["LData;", "LData;"],
        "LData;",
        true,
    )]);
    let method = methods.get("LFoo;.process:(LData;LData;)LData;").unwrap();

    let model = model_from_config_json(
        Some(method),
        &json!({
            "method": "LFoo;.process:(LData;LData;)LData;",
            "generations": [
                { "kind": "T", "port": "Return", "features": ["via-gen"] }
            ],
            "sinks": [
                { "kind": "Danger", "port": "Argument(0)" }
            ],
            "propagation": [
                { "input": "Argument(1)", "output": "Return" }
            ],
            "sanitizers": [
                { "sanitize": "sources", "kinds": ["T"] }
            ],
            "modes": ["no-collapse-on-propagation"]
        }),
        &context,
    )
    .unwrap();

    assert!(!model.generations().is_bottom());
    assert!(!model.sinks().is_bottom());
    assert!(!model.propagations().is_bottom());
    assert!(!model.global_sanitizers().is_empty());
    assert!(model.no_collapse_on_propagation());
}

#[test]
fn config_schema_rejects_unknown_members() {
    let context = context();
    let result = model_from_config_json(
        None,
        &json!({ "method": "LFoo;.f:()V", "generations": [], "surprise": true }),
        &context,
    );
    assert!(matches!(
        result,
        Err(ModelValidationError::UnexpectedMember { member, .. }) if member == "surprise"
    ));
}

#[test]
fn config_schema_rejects_out_of_range_ports() {
    let context = context();
    let methods = methods_with(&[("LFoo;", "f", vec![], "LData;", true)]);
    let method = methods.get("LFoo;.f:()LData;").unwrap();

    let result = model_from_config_json(
        Some(method),
        &json!({
            "method": "LFoo;.f:()LData;",
            "sinks": [ { "kind": "T", "port": "Argument(2)" } ]
        }),
        &context,
    );
    assert!(matches!(
        result,
        Err(ModelValidationError::PortOutOfRange { .. })
    ));
}

#[test]
fn dump_load_round_trip_is_identity() {
    let context = context();
    let methods = methods_with(&[
        ("LFoo;", "process", vec!["LData;"], "LData;", true),
        ("LS;", "source", vec![], "LData;", true),
    ]);
    let fields = Fields::new();
    let method = methods.get("LFoo;.process:(LData;)LData;").unwrap();

    let model = model_from_config_json(
        Some(method),
        &json!({
            "method": "LFoo;.process:(LData;)LData;",
            "generations": [
                { "kind": "T", "port": "Return.payload", "features": ["via-gen"] }
            ],
            "parameter_sources": [
                { "kind": "Input", "port": "Argument(0)" }
            ],
            "sinks": [
                { "kind": "Danger", "port": "Argument(0).header" }
            ],
            "propagation": [
                { "input": "Argument(0)", "output": "Return" }
            ],
            "modes": ["alias-memory-location-on-invoke"],
            "freeze": ["generations"]
        }),
        &context,
    )
    .unwrap();

    let dumped = model_to_json(&model, &context);
    let reloaded = model_from_json(&dumped, &context, &methods, &fields).unwrap();
    let dumped_again = model_to_json(&reloaded, &context);
    assert_eq!(dumped, dumped_again);
}

#[test]
fn round_trip_preserves_issue_keys() {
    let context = context();
    let methods = methods_with(&[
        ("LC;", "f", vec![], "V", true),
        ("LS;", "source", vec![], "LData;", true),
    ]);
    let fields = Fields::new();
    let method = methods.get("LC;.f:()V").unwrap();

    let kind = context.kinds.named(context.str("T"));
    let port = context.access_paths.get(AccessPath::from_root(Root::leaf()));
    let taint = dexflow_analysis::domains::Taint::from_frame(
        dexflow_analysis::domains::CallInfo::declaration(port),
        dexflow_analysis::domains::Frame::leaf(kind),
    );

    let mut model = dexflow_analysis::model::Model::new(Some(method));
    model.add_issue(dexflow_analysis::model::Issue {
        sources: taint.clone(),
        sinks: taint,
        rule_code: 7,
        callee: "LK;.sink:(LData;)V".to_string(),
        sink_index: 0,
        position: Some(context.positions.get("C.java", 11)),
    });

    let dumped = model_to_json(&model, &context);
    let reloaded = model_from_json(&dumped, &context, &methods, &fields).unwrap();
    assert_eq!(reloaded.issues().len(), 1);
    let issue = reloaded.issues().iter_sorted()[0];
    assert_eq!(issue.rule_code, 7);
    assert_eq!(issue.sink_index, 0);
    assert_eq!(issue.position.unwrap().line(), 11);
}
