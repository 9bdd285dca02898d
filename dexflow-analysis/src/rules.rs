//! Rules: source-kind × sink-kind pairs whose co-occurrence is an issue.

use rustc_hash::FxHashSet;
use serde_json::Value;

use dexflow_core::errors::ConfigError;

use crate::context::AnalysisContext;
use crate::kinds::{Kind, KindHandle, Transform, TransformHandle};

/// One rule from the rules JSON.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub code: i32,
    pub description: String,
    pub source_kinds: FxHashSet<KindHandle>,
    pub sink_kinds: FxHashSet<KindHandle>,
    /// When present, the source taint must have passed exactly this
    /// transform sequence for the rule to fire.
    pub transforms: Option<Vec<TransformHandle>>,
}

impl Rule {
    /// Whether taint of `source_kind` reaching `sink_kind` violates this
    /// rule.
    pub fn matches(&self, source_kind: KindHandle, sink_kind: KindHandle) -> bool {
        if !self.source_kinds.contains(&source_kind.discard_transforms())
            || !self.sink_kinds.contains(&sink_kind.discard_transforms())
        {
            return false;
        }
        let applied = named_transforms_of(source_kind);
        match &self.transforms {
            None => applied.is_empty(),
            Some(expected) => applied == *expected,
        }
    }

    pub fn uses(&self, kind: KindHandle) -> bool {
        let base = kind.discard_transforms();
        self.source_kinds.contains(&base) || self.sink_kinds.contains(&base)
    }
}

/// The named (non-sanitizer) transforms a kind has passed through,
/// innermost first.
fn named_transforms_of(kind: KindHandle) -> Vec<TransformHandle> {
    let Kind::Transform {
        local_transforms,
        global_transforms,
        ..
    } = &*kind
    else {
        return Vec::new();
    };
    let mut transforms = Vec::new();
    for list in [local_transforms, global_transforms].into_iter().flatten() {
        for transform in list.iter() {
            if matches!(&*transform, Transform::Named(_)) {
                transforms.push(transform);
            }
        }
    }
    transforms
}

/// All loaded rules with indexed lookups.
#[derive(Debug, Default)]
pub struct Rules {
    rules: Vec<Rule>,
}

impl Rules {
    pub fn new(rules: Vec<Rule>) -> Self {
        Rules { rules }
    }

    /// Load rule files, failing fast on malformed input.
    pub fn load(paths: &[std::path::PathBuf], context: &AnalysisContext) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();
        for path in paths {
            let content =
                std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })?;
            let value: Value =
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            rules.extend(Self::parse(&value, context, &path.display().to_string())?);
        }
        Ok(Rules::new(rules))
    }

    pub fn from_json(value: &Value, context: &AnalysisContext) -> Result<Self, ConfigError> {
        Ok(Rules::new(Self::parse(value, context, "<inline>")?))
    }

    fn parse(
        value: &Value,
        context: &AnalysisContext,
        path: &str,
    ) -> Result<Vec<Rule>, ConfigError> {
        let array = value.as_array().ok_or_else(|| ConfigError::ParseError {
            path: path.to_string(),
            message: "rules file must be a JSON array".to_string(),
        })?;

        let kinds = |entry: &Value, key: &str| -> Result<FxHashSet<KindHandle>, ConfigError> {
            let array = entry
                .get(key)
                .and_then(Value::as_array)
                .ok_or_else(|| ConfigError::ParseError {
                    path: path.to_string(),
                    message: format!("rule without `{key}` array"),
                })?;
            array
                .iter()
                .map(|kind| {
                    kind.as_str()
                        .map(|name| context.kinds.named(context.str(name)))
                        .ok_or_else(|| ConfigError::ParseError {
                            path: path.to_string(),
                            message: format!("`{key}` entries must be strings"),
                        })
                })
                .collect()
        };

        array
            .iter()
            .map(|entry| {
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConfigError::ParseError {
                        path: path.to_string(),
                        message: "rule without name".to_string(),
                    })?
                    .to_string();
                let code = entry
                    .get("code")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ConfigError::ParseError {
                        path: path.to_string(),
                        message: format!("rule `{name}` without code"),
                    })? as i32;
                let description = entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let transforms = entry.get("transforms").and_then(Value::as_array).map(
                    |array| {
                        array
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|name| context.transforms.named(context.str(name)))
                            .collect()
                    },
                );
                Ok(Rule {
                    name,
                    code,
                    description,
                    source_kinds: kinds(entry, "sources")?,
                    sink_kinds: kinds(entry, "sinks")?,
                    transforms,
                })
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules violated by `source_kind` flowing into `sink_kind`.
    pub fn matching(
        &self,
        source_kind: KindHandle,
        sink_kind: KindHandle,
    ) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(move |rule| rule.matches(source_kind, sink_kind))
    }

    pub fn uses(&self, kind: KindHandle) -> bool {
        self.rules.iter().any(|rule| rule.uses(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> AnalysisContext {
        AnalysisContext::for_test()
    }

    #[test]
    fn parses_rules_and_matches_kinds() {
        let context = context();
        let rules = Rules::from_json(
            &json!([
                {
                    "name": "Secret to network",
                    "code": 1,
                    "description": "Secret data reaches the network",
                    "sources": ["Secret"],
                    "sinks": ["Network"]
                }
            ]),
            &context,
        )
        .unwrap();

        let secret = context.kinds.named(context.str("Secret"));
        let network = context.kinds.named(context.str("Network"));
        let other = context.kinds.named(context.str("Other"));

        assert_eq!(rules.matching(secret, network).count(), 1);
        assert_eq!(rules.matching(other, network).count(), 0);
        assert_eq!(rules.matching(secret, other).count(), 0);
        assert!(rules.uses(secret));
        assert!(!rules.uses(other));
    }

    #[test]
    fn transform_rules_require_the_exact_sequence() {
        let context = context();
        let rules = Rules::from_json(
            &json!([
                {
                    "name": "Decoded secret to network",
                    "code": 2,
                    "description": "",
                    "sources": ["Secret"],
                    "sinks": ["Network"],
                    "transforms": ["decode"]
                }
            ]),
            &context,
        )
        .unwrap();

        let secret = context.kinds.named(context.str("Secret"));
        let network = context.kinds.named(context.str("Network"));
        let decode = context.transforms.named(context.str("decode"));
        let list = context
            .transforms
            .create(crate::kinds::TransformList::new(vec![decode]));
        let decoded_secret = context.kinds.transform_kind(secret, list, None);

        // The plain kind does not fire the transform rule.
        assert_eq!(rules.matching(secret, network).count(), 0);
        assert_eq!(rules.matching(decoded_secret, network).count(), 1);
    }

    #[test]
    fn rejects_malformed_rules() {
        let context = context();
        assert!(Rules::from_json(&json!({}), &context).is_err());
        assert!(Rules::from_json(&json!([{ "name": "x" }]), &context).is_err());
    }
}
