//! The model registry: method, field and literal models under sharded
//! locks.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::RwLock;

use rustc_hash::{FxHashMap, FxHasher};
use serde_json::Value;
use tracing::{info, warn};

use dexflow_core::errors::{DexflowErrorCode, ModelValidationError, RegistryError, RunError};

use crate::context::AnalysisContext;
use crate::domains::{AbstractDomain, Taint};
use crate::ir::{FieldHandle, MethodHandle, Program};
use crate::model::json::model_from_config_json;
use crate::model::{FieldModel, LiteralModel, Model};

const SHARD_COUNT: usize = 64;

/// Concurrent store of per-method models. Readers take a shard read
/// lock; the scheduler's joins take the shard write lock.
pub struct Registry {
    shards: Vec<RwLock<FxHashMap<MethodHandle, Model>>>,
    field_models: RwLock<FxHashMap<FieldHandle, FieldModel>>,
    literal_models: RwLock<Vec<LiteralModel>>,
    /// Non-fatal errors collected while loading.
    errors: RwLock<Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(FxHashMap::default()))
                .collect(),
            field_models: RwLock::new(FxHashMap::default()),
            literal_models: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
        }
    }

    fn shard(&self, method: MethodHandle) -> &RwLock<FxHashMap<MethodHandle, Model>> {
        let mut hasher = FxHasher::default();
        method.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Load every model source: JSON shard files plus generated models.
    /// Per-entry errors are collected, the offending entries dropped.
    pub fn load(
        context: &AnalysisContext,
        program: &Program,
        generated: Vec<Model>,
    ) -> Result<Self, RunError> {
        let registry = Registry::new();

        for path in &context.options.models_paths {
            registry.load_path(path, context, program)?;
        }
        for model in generated {
            if let Some(method) = model.method() {
                registry.join(method, model);
            }
        }

        info!(models = registry.models_size(), "initialized models");
        Ok(registry)
    }

    fn load_path(
        &self,
        path: &Path,
        context: &AnalysisContext,
        program: &Program,
    ) -> Result<(), RunError> {
        if path.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(path)
                .map_err(|e| {
                    RunError::Registry(RegistryError::ShardReadFailed {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })
                })?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|entry| entry.extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort();
            for entry in entries {
                self.load_path(&entry, context, program)?;
            }
            return Ok(());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RunError::Registry(RegistryError::ShardReadFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })?;

        // Shard files are one JSON object per line with `//` comment
        // lines; plain JSON arrays are accepted too.
        let values: Vec<Value> = if content.trim_start().starts_with('[') {
            serde_json::from_str::<Vec<Value>>(&content).map_err(|e| {
                RunError::Registry(RegistryError::ShardReadFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            })?
        } else {
            content
                .lines()
                .filter(|line| !line.trim_start().starts_with("//"))
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<Result<_, _>>()
                .map_err(|e| {
                    RunError::Registry(RegistryError::ShardReadFailed {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })
                })?
        };

        for value in values {
            if let Err(error) = self.load_entry(&value, context, program) {
                warn!(error = %error, "dropping invalid model entry");
                self.errors.write().expect("lock").push(error.coded_string());
            }
        }
        Ok(())
    }

    fn load_entry(
        &self,
        value: &Value,
        context: &AnalysisContext,
        program: &Program,
    ) -> Result<(), ModelValidationError> {
        if let Some(signature) = value.get("method").and_then(Value::as_str) {
            let method = program.methods.get(signature).ok_or_else(|| {
                ModelValidationError::MalformedJson {
                    method: signature.to_string(),
                    message: "unresolved method reference".to_string(),
                }
            })?;
            let model = model_from_config_json(Some(method), value, context)?;
            self.join(method, model);
            return Ok(());
        }
        if let Some(signature) = value.get("field").and_then(Value::as_str) {
            let (class, name) =
                signature
                    .rsplit_once('.')
                    .ok_or_else(|| ModelValidationError::MalformedJson {
                        method: signature.to_string(),
                        message: "malformed field signature".to_string(),
                    })?;
            let field = program.fields.get(class, name);
            let mut model = FieldModel::default();
            if let Some(sources) = value.get("sources").and_then(Value::as_array) {
                for entry in sources {
                    let kind = crate::model::json::kind_from_json(
                        entry.get("kind").unwrap_or(&Value::Null),
                        context,
                        signature,
                    )?;
                    let mut taint = crate::model::TaintConfig::new(kind).into_taint(context);
                    taint.add_field_origins_if_declaration(field);
                    model.sources.join_with(taint);
                }
            }
            if let Some(sinks) = value.get("sinks").and_then(Value::as_array) {
                for entry in sinks {
                    let kind = crate::model::json::kind_from_json(
                        entry.get("kind").unwrap_or(&Value::Null),
                        context,
                        signature,
                    )?;
                    let mut taint = crate::model::TaintConfig::new(kind).into_taint(context);
                    taint.add_field_origins_if_declaration(field);
                    model.sinks.join_with(taint);
                }
            }
            self.join_field(field, model);
            return Ok(());
        }
        if let Some(pattern) = value.get("literal").and_then(Value::as_str) {
            let mut sources = Taint::bottom();
            if let Some(entries) = value.get("sources").and_then(Value::as_array) {
                for entry in entries {
                    let kind = crate::model::json::kind_from_json(
                        entry.get("kind").unwrap_or(&Value::Null),
                        context,
                        pattern,
                    )?;
                    sources
                        .join_with(crate::model::TaintConfig::new(kind).into_taint(context));
                }
            }
            self.literal_models.write().expect("lock").push(LiteralModel {
                pattern: pattern.to_string(),
                sources,
            });
            return Ok(());
        }
        Err(ModelValidationError::MalformedJson {
            method: "<unknown>".to_string(),
            message: "entry names no method, field or literal".to_string(),
        })
    }

    /// The current model of a method; the conservative obscure model for
    /// unknown body-less methods.
    pub fn model(
        &self,
        method: MethodHandle,
        has_code: bool,
        context: &AnalysisContext,
    ) -> Model {
        if let Some(model) = self.shard(method).read().expect("lock").get(&method) {
            return model.clone();
        }
        if has_code {
            Model::new(Some(method))
        } else {
            Model::obscure_default(Some(method), context)
        }
    }

    pub fn get(&self, method: MethodHandle) -> Option<Model> {
        self.shard(method).read().expect("lock").get(&method).cloned()
    }

    pub fn set(&self, method: MethodHandle, model: Model) {
        self.shard(method)
            .write()
            .expect("lock")
            .insert(method, model);
    }

    /// Join a model into the registry. Returns true when the stored
    /// model strictly grew.
    pub fn join(&self, method: MethodHandle, model: Model) -> bool {
        let mut shard = self.shard(method).write().expect("lock");
        match shard.get_mut(&method) {
            Some(existing) => {
                if model.leq(existing) {
                    return false;
                }
                existing.join_with(&model);
                true
            }
            None => {
                shard.insert(method, model);
                true
            }
        }
    }

    pub fn field_model(&self, field: FieldHandle) -> FieldModel {
        self.field_models
            .read()
            .expect("lock")
            .get(&field)
            .cloned()
            .unwrap_or_default()
    }

    pub fn join_field(&self, field: FieldHandle, model: FieldModel) {
        self.field_models
            .write()
            .expect("lock")
            .entry(field)
            .or_default()
            .join_with(&model);
    }

    /// Sources attached to a string literal by the literal models.
    pub fn literal_sources(&self, literal: &str) -> Taint {
        let mut sources = Taint::bottom();
        for model in self.literal_models.read().expect("lock").iter() {
            if model.matches(literal) {
                sources.join_with(model.sources.clone());
            }
        }
        sources
    }

    pub fn models_size(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().expect("lock").len())
            .sum()
    }

    pub fn issues_size(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .expect("lock")
                    .values()
                    .map(|model| model.issues().len())
                    .sum::<usize>()
            })
            .sum()
    }

    /// All models sorted by method signature, for deterministic dumps.
    pub fn sorted_models(&self) -> Vec<(String, Model)> {
        let mut models: Vec<(String, Model)> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .expect("lock")
                    .iter()
                    .map(|(method, model)| (method.signature(), model.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        models.sort_by(|a, b| a.0.cmp(&b.0));
        models
    }

    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.errors.write().expect("lock"))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, Root};
    use crate::model::TaintConfig;

    #[test]
    fn join_reports_strict_growth() {
        let context = AnalysisContext::for_test();
        let mut methods = crate::ir::Methods::new();
        let method = methods.create(
            crate::ir::Method::new(
                "LFoo;".to_string(),
                "f".to_string(),
                vec![],
                "LData;".to_string(),
                true,
            ),
            None,
        );

        let registry = Registry::new();
        let empty = Model::new(Some(method));
        assert!(registry.join(method, empty.clone()));
        // Joining the same model again is not growth.
        assert!(!registry.join(method, empty));

        let kind = context.kinds.named(context.str("Secret"));
        let mut bigger = Model::new(Some(method));
        bigger
            .add_generation(
                AccessPath::from_root(Root::return_value()),
                TaintConfig::new(kind),
                &context,
            )
            .unwrap();
        assert!(registry.join(method, bigger.clone()));
        assert!(!registry.join(method, bigger));
    }

    #[test]
    fn unknown_methods_get_the_obscure_default() {
        let context = AnalysisContext::for_test();
        let mut methods = crate::ir::Methods::new();
        let method = methods.create(
            crate::ir::Method::new(
                "LFoo;".to_string(),
                "f".to_string(),
                vec![],
                "LData;".to_string(),
                true,
            ),
            None,
        );

        let registry = Registry::new();
        let model = registry.model(method, false, &context);
        assert!(model.is_taint_in_taint_out());
        assert!(model.add_via_obscure_feature());

        let with_code = registry.model(method, true, &context);
        assert!(!with_code.is_taint_in_taint_out());
    }
}
