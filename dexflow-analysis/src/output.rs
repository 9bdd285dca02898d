//! Output writers: metadata, sharded models, coverage.

use std::io::Write;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::info;
use xxhash_rust::xxh3::xxh3_64;

use dexflow_core::errors::OutputError;

use crate::context::AnalysisContext;
use crate::interprocedural::AnalysisStatistics;
use crate::ir::Program;
use crate::model::json::model_to_json;
use crate::registry::Registry;
use crate::rules::Rules;

/// Write every output artifact into the configured output directory.
pub fn dump_all(
    context: &AnalysisContext,
    program: &Program,
    registry: &Registry,
    rules: &Rules,
    statistics: &AnalysisStatistics,
) -> Result<(), OutputError> {
    let directory = &context.options.output_directory;
    std::fs::create_dir_all(directory).map_err(|e| OutputError::DirectoryCreationFailed {
        path: directory.display().to_string(),
        message: e.to_string(),
    })?;

    dump_models(context, registry, directory)?;
    dump_metadata(context, registry, rules, statistics, directory)?;
    dump_methods(program, directory)?;
    dump_class_intervals(program, directory)?;
    dump_overrides(program, directory)?;
    dump_rule_coverage(registry, rules, directory)?;
    dump_file_coverage(registry, directory)?;

    info!(directory = %directory.display(), "wrote analysis outputs");
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<(), OutputError> {
    let mut file = std::fs::File::create(path).map_err(|e| OutputError::WriteFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    file.write_all(content.as_bytes())
        .map_err(|e| OutputError::WriteFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Shard the models deterministically: entries are bucketed by the hash
/// of their key and written one JSON object per line, in insertion
/// order, behind a `// @generated` header.
pub fn dump_models(
    context: &AnalysisContext,
    registry: &Registry,
    directory: &Path,
) -> Result<(), OutputError> {
    let models = registry.sorted_models();
    let shard_count = models.len().div_ceil(context.options.shard_size).max(1);

    let mut shards: Vec<Vec<String>> = vec![Vec::new(); shard_count];
    for (key, model) in &models {
        let bucket = (xxh3_64(key.as_bytes()) as usize) % shard_count;
        let value = model_to_json(model, context);
        let line =
            serde_json::to_string(&value).map_err(|e| OutputError::SerializationFailed {
                what: format!("model for {key}"),
                message: e.to_string(),
            })?;
        shards[bucket].push(line);
    }

    for (index, lines) in shards.iter().enumerate() {
        let path = directory.join(format!("model@{index:05}.json"));
        let mut content = String::from("// @generated\n");
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        write_file(&path, &content)?;
    }
    Ok(())
}

fn dump_metadata(
    context: &AnalysisContext,
    registry: &Registry,
    rules: &Rules,
    statistics: &AnalysisStatistics,
    directory: &Path,
) -> Result<(), OutputError> {
    let mut rules_dictionary = Map::new();
    for rule in rules.iter() {
        rules_dictionary.insert(
            rule.code.to_string(),
            json!({
                "description": rule.description,
                "name": rule.name,
            }),
        );
    }

    let mut errors: Vec<String> = registry.take_errors();
    errors.extend(statistics.errors.iter().cloned());
    errors.sort_unstable();

    let metadata = json!({
        "errors": errors,
        "rules": Value::Object(rules_dictionary),
        "statistics": {
            "issues": registry.issues_size(),
            "iterations": statistics.iterations,
            "methods_analyzed": statistics.methods_analyzed,
            "models": registry.models_size(),
            "strata": statistics.strata,
            "timeouts": statistics.timeouts,
        },
        "version": env!("CARGO_PKG_VERSION"),
    });

    let content = serde_json::to_string_pretty(&metadata).map_err(|e| {
        OutputError::SerializationFailed {
            what: "metadata".to_string(),
            message: e.to_string(),
        }
    })?;
    write_file(&directory.join("metadata.json"), &content)
}

fn dump_methods(program: &Program, directory: &Path) -> Result<(), OutputError> {
    let mut methods: Vec<String> = program
        .methods
        .iter()
        .map(|method| method.signature())
        .collect();
    methods.sort_unstable();
    let content =
        serde_json::to_string_pretty(&methods).map_err(|e| OutputError::SerializationFailed {
            what: "methods".to_string(),
            message: e.to_string(),
        })?;
    write_file(&directory.join("methods.json"), &content)
}

fn dump_class_intervals(program: &Program, directory: &Path) -> Result<(), OutputError> {
    let mut intervals: Vec<(String, Value)> = program
        .class_intervals
        .iter()
        .map(|(class, interval)| {
            (
                class.to_string(),
                json!([interval.lo(), interval.hi()]),
            )
        })
        .collect();
    intervals.sort_by(|a, b| a.0.cmp(&b.0));
    let object: Map<String, Value> = intervals.into_iter().collect();
    let content = serde_json::to_string_pretty(&Value::Object(object)).map_err(|e| {
        OutputError::SerializationFailed {
            what: "class intervals".to_string(),
            message: e.to_string(),
        }
    })?;
    write_file(&directory.join("class_intervals.json"), &content)
}

fn dump_overrides(program: &Program, directory: &Path) -> Result<(), OutputError> {
    let mut entries: Vec<(String, Value)> = program
        .methods
        .iter()
        .filter(|&method| program.overrides.has_overrides(method))
        .map(|method| {
            let overrides: Vec<String> = program
                .overrides
                .get(method)
                .iter()
                .map(|override_method| override_method.signature())
                .collect();
            (method.signature(), json!(overrides))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let object: Map<String, Value> = entries.into_iter().collect();
    let content = serde_json::to_string_pretty(&Value::Object(object)).map_err(|e| {
        OutputError::SerializationFailed {
            what: "overrides".to_string(),
            message: e.to_string(),
        }
    })?;
    write_file(&directory.join("overrides.json"), &content)
}

fn dump_rule_coverage(
    registry: &Registry,
    rules: &Rules,
    directory: &Path,
) -> Result<(), OutputError> {
    let mut issues_per_rule: Map<String, Value> = Map::new();
    for rule in rules.iter() {
        let count: usize = registry
            .sorted_models()
            .iter()
            .map(|(_, model)| {
                model
                    .issues()
                    .iter_sorted()
                    .iter()
                    .filter(|issue| issue.rule_code == rule.code)
                    .count()
            })
            .sum();
        issues_per_rule.insert(rule.code.to_string(), json!(count));
    }
    let content = serde_json::to_string_pretty(&Value::Object(issues_per_rule)).map_err(
        |e| OutputError::SerializationFailed {
            what: "rule coverage".to_string(),
            message: e.to_string(),
        },
    )?;
    write_file(&directory.join("rule_coverage.json"), &content)
}

fn dump_file_coverage(registry: &Registry, directory: &Path) -> Result<(), OutputError> {
    let mut files: Vec<String> = Vec::new();
    for (_, model) in registry.sorted_models() {
        for issue in model.issues().iter_sorted() {
            if let Some(position) = issue.position {
                if !position.is_unknown() {
                    files.push(position.path().to_string());
                }
            }
        }
    }
    files.sort_unstable();
    files.dedup();
    write_file(&directory.join("file_coverage.txt"), &(files.join("\n") + "\n"))
}
