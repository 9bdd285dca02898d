//! Program IR loading from JSON.
//!
//! The handoff format of the bytecode front-end: classes with methods,
//! methods with blocks, blocks with instructions and successor edges.

use std::path::Path;

use serde::Deserialize;

use dexflow_core::errors::ConfigError;

use super::cfg::ControlFlowGraph;
use super::instruction::Instruction;
use super::position::Positions;
use super::program::{Program, ProgramBuilder};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramJson {
    classes: Vec<ClassJson>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassJson {
    name: String,
    #[serde(rename = "super", default)]
    superclass: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    methods: Vec<MethodJson>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodJson {
    name: String,
    #[serde(default)]
    parameters: Vec<String>,
    #[serde(default = "default_return_type")]
    return_type: String,
    #[serde(default, rename = "static")]
    is_static: bool,
    #[serde(default)]
    blocks: Vec<BlockJson>,
}

fn default_return_type() -> String {
    "V".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockJson {
    instructions: Vec<InstructionJson>,
    #[serde(default)]
    successors: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct InstructionJson {
    #[serde(flatten)]
    instruction: Instruction,
    #[serde(default)]
    line: Option<u32>,
}

/// Load a program IR JSON file.
pub fn load_program(path: &Path, positions: &Positions) -> Result<Program, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    parse_program(&content, &path.display().to_string(), positions)
}

/// Parse a program IR JSON string.
pub fn parse_program(
    content: &str,
    path: &str,
    positions: &Positions,
) -> Result<Program, ConfigError> {
    let json: ProgramJson =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_string(),
            message: e.to_string(),
        })?;

    let mut builder = ProgramBuilder::default();
    for class in &json.classes {
        builder.class(&class.name, class.superclass.as_deref());
    }
    for class in json.classes {
        let source = class.source.clone().unwrap_or_else(|| class.name.clone());
        for method in class.methods {
            let code = if method.blocks.is_empty() {
                None
            } else {
                Some(build_cfg(&method.blocks, &source, positions))
            };
            builder.method(
                &class.name,
                &method.name,
                method.parameters,
                &method.return_type,
                method.is_static,
                code,
            );
        }
    }
    Ok(builder.build())
}

fn build_cfg(blocks: &[BlockJson], source: &str, positions: &Positions) -> ControlFlowGraph {
    let mut builder = ControlFlowGraph::builder();
    for block in blocks {
        builder.block(
            block
                .instructions
                .iter()
                .map(|entry| {
                    (
                        entry.instruction.clone(),
                        entry.line.map(|line| positions.get(source, line)),
                    )
                })
                .collect(),
        );
    }
    for (id, block) in blocks.iter().enumerate() {
        for &successor in &block.successors {
            builder.edge(id as u32, successor);
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_program() {
        let positions = Positions::new();
        let program = parse_program(
            r#"{
                "classes": [
                    {
                        "name": "LFoo;",
                        "source": "Foo.java",
                        "methods": [
                            {
                                "name": "f",
                                "parameters": [],
                                "return_type": "V",
                                "static": true,
                                "blocks": [
                                    {
                                        "instructions": [
                                            { "op": "return", "src": null, "line": 3 }
                                        ]
                                    }
                                ]
                            }
                        ]
                    }
                ]
            }"#,
            "<test>",
            &positions,
        )
        .unwrap();

        let method = program.methods.get("LFoo;.f:()V").unwrap();
        let cfg = program.methods.code(method).unwrap();
        assert_eq!(cfg.blocks().len(), 1);
        let entry = &cfg.block(0).instructions[0];
        assert_eq!(entry.position.unwrap().line(), 3);
    }

    #[test]
    fn rejects_malformed_program() {
        let positions = Positions::new();
        assert!(parse_program(r#"{ "bogus": [] }"#, "<test>", &positions).is_err());
    }
}
