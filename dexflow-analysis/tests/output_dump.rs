//! Output writers: shard layout, headers and byte idempotence.

use dexflow_analysis::access::{AccessPath, Root};
use dexflow_analysis::context::AnalysisContext;
use dexflow_analysis::interprocedural::AnalysisStatistics;
use dexflow_analysis::ir::Program;
use dexflow_analysis::model::{Model, TaintConfig};
use dexflow_analysis::output::dump_all;
use dexflow_analysis::registry::Registry;
use dexflow_analysis::rules::Rules;
use dexflow_core::{Heuristics, Options};

fn populated_registry(context: &AnalysisContext, builder: &mut dexflow_analysis::ir::ProgramBuilder) -> Registry {
    let registry = Registry::new();
    let kind = context.kinds.named(context.str("T"));
    for class in ["LA;", "LB;", "LC;"] {
        let method = builder.method(class, "source", vec![], "LData;", true, None);
        let mut model = Model::new(Some(method));
        model
            .add_generation(
                AccessPath::from_root(Root::return_value()),
                TaintConfig::new(kind),
                context,
            )
            .unwrap();
        registry.join(method, model);
    }
    registry
}

fn dump_to(directory: &std::path::Path) -> Vec<(String, String)> {
    let options = Options {
        output_directory: directory.to_path_buf(),
        shard_size: 2,
        ..Options::default()
    };
    let context = AnalysisContext::new(options, Heuristics::default());
    let mut builder = Program::builder();
    let registry = populated_registry(&context, &mut builder);
    let program = builder.build();
    let rules = Rules::new(vec![]);

    dump_all(
        &context,
        &program,
        &registry,
        &rules,
        &AnalysisStatistics::default(),
    )
    .unwrap();

    let mut files: Vec<(String, String)> = std::fs::read_dir(directory)
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().to_string(),
                std::fs::read_to_string(entry.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[test]
fn shards_carry_the_generated_header_and_one_model_per_line() {
    let directory = tempfile::tempdir().unwrap();
    let files = dump_to(directory.path());

    let shards: Vec<&(String, String)> = files
        .iter()
        .filter(|(name, _)| name.starts_with("model@"))
        .collect();
    // Three models at shard_size 2 make two shards.
    assert_eq!(shards.len(), 2);

    let mut model_lines = 0;
    for (name, content) in &shards {
        assert!(name.ends_with(".json"));
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("// @generated"));
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("method").is_some());
            model_lines += 1;
        }
    }
    assert_eq!(model_lines, 3);

    for expected in [
        "metadata.json",
        "methods.json",
        "class_intervals.json",
        "overrides.json",
        "rule_coverage.json",
        "file_coverage.txt",
    ] {
        assert!(
            files.iter().any(|(name, _)| name == expected),
            "missing {expected}"
        );
    }
}

#[test]
fn dumps_are_byte_identical_across_runs() {
    let first_directory = tempfile::tempdir().unwrap();
    let second_directory = tempfile::tempdir().unwrap();
    let first = dump_to(first_directory.path());
    let second = dump_to(second_directory.path());
    assert_eq!(first, second);
}
