//! Call graph, override index and reverse dependencies.

use rustc_hash::FxHashMap;
use tracing::warn;

use super::cfg::InstructionId;
use super::class_intervals::ClassIntervals;
use super::instruction::{Instruction, InvokeKind};
use super::method::{MethodHandle, Methods};
use super::types::TypeIndex;

/// Method → overriding methods in subclasses.
#[derive(Debug, Default)]
pub struct Overrides {
    overrides: FxHashMap<MethodHandle, Vec<MethodHandle>>,
}

impl Overrides {
    pub fn build(
        methods: &Methods,
        intervals: &ClassIntervals,
    ) -> Self {
        // Group methods by proto; an override is a same-proto method in a
        // class whose interval is strictly inside the base class's.
        let mut by_proto: FxHashMap<String, Vec<MethodHandle>> = FxHashMap::default();
        for method in methods.iter() {
            by_proto.entry(method.proto()).or_default().push(method);
        }

        let mut overrides: FxHashMap<MethodHandle, Vec<MethodHandle>> =
            FxHashMap::default();
        for candidates in by_proto.values() {
            for &base in candidates {
                let base_interval = intervals.get(base.class_name());
                if base_interval.is_top() {
                    continue;
                }
                let mut overriding: Vec<MethodHandle> = candidates
                    .iter()
                    .copied()
                    .filter(|&other| {
                        other != base
                            && base_interval.contains(intervals.get(other.class_name()))
                            && !intervals.get(other.class_name()).contains(base_interval)
                    })
                    .collect();
                if !overriding.is_empty() {
                    // Deterministic order for joins and output.
                    overriding.sort_by_key(|method| method.signature());
                    overrides.insert(base, overriding);
                }
            }
        }

        Overrides { overrides }
    }

    pub fn get(&self, method: MethodHandle) -> &[MethodHandle] {
        self.overrides
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_overrides(&self, method: MethodHandle) -> bool {
        !self.get(method).is_empty()
    }
}

/// A resolved call site.
#[derive(Debug, Clone)]
pub struct CallTarget {
    /// The resolved base callee, if resolution succeeded.
    pub resolved_base: Option<MethodHandle>,
    /// Overrides joined at virtual dispatch.
    pub overrides: Vec<MethodHandle>,
    /// The static class named at the call site.
    pub receiver_class: Option<String>,
    pub invoke_kind: InvokeKind,
}

impl CallTarget {
    pub fn resolved(&self) -> bool {
        self.resolved_base.is_some()
    }
}

/// Resolved targets per `(caller, instruction)` call site.
#[derive(Debug, Default)]
pub struct CallGraph {
    targets: FxHashMap<(MethodHandle, InstructionId), CallTarget>,
}

impl CallGraph {
    pub fn build(
        methods: &Methods,
        types: &TypeIndex,
        overrides: &Overrides,
    ) -> Self {
        let mut targets = FxHashMap::default();

        for caller in methods.iter() {
            let Some(cfg) = methods.code(caller) else {
                continue;
            };
            for block in cfg.blocks() {
                for entry in &block.instructions {
                    let Instruction::Invoke { kind, method, .. } = &entry.instruction
                    else {
                        continue;
                    };
                    let target = Self::resolve(methods, types, overrides, *kind, method);
                    if !target.resolved() {
                        warn!(caller = %caller.signature(), callee = %method,
                              "unable to resolve call");
                    }
                    targets.insert((caller, entry.id), target);
                }
            }
        }

        CallGraph { targets }
    }

    fn resolve(
        methods: &Methods,
        types: &TypeIndex,
        overrides: &Overrides,
        invoke_kind: InvokeKind,
        signature: &str,
    ) -> CallTarget {
        let (class, proto) = match split_signature(signature) {
            Some(parts) => parts,
            None => {
                return CallTarget {
                    resolved_base: None,
                    overrides: Vec::new(),
                    receiver_class: None,
                    invoke_kind,
                }
            }
        };

        // Walk up the hierarchy until a definition matches.
        let mut resolved = None;
        let mut current = Some(class.to_string());
        while let Some(class_name) = current {
            if let Some(handle) = methods.get(&format!("{class_name}.{proto}")) {
                resolved = Some(handle);
                break;
            }
            current = types.superclass_of(&class_name).map(str::to_string);
        }

        let override_set = match resolved {
            Some(base) if invoke_kind.is_virtual() => overrides.get(base).to_vec(),
            _ => Vec::new(),
        };

        CallTarget {
            resolved_base: resolved,
            overrides: override_set,
            receiver_class: Some(class.to_string()),
            invoke_kind,
        }
    }

    pub fn callee(
        &self,
        caller: MethodHandle,
        instruction: InstructionId,
    ) -> Option<&CallTarget> {
        self.targets.get(&(caller, instruction))
    }

    /// All (resolved) callees of a method, overrides included.
    pub fn callees(&self, caller: MethodHandle) -> Vec<MethodHandle> {
        let mut callees = Vec::new();
        for ((site_caller, _), target) in &self.targets {
            if *site_caller != caller {
                continue;
            }
            callees.extend(target.resolved_base);
            callees.extend(target.overrides.iter().copied());
        }
        callees.sort_by_key(|method| method.signature());
        callees.dedup();
        callees
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&(MethodHandle, InstructionId), &CallTarget)> {
        self.targets.iter()
    }
}

/// Split `LClass;.name:(params)ret` into class and proto.
fn split_signature(signature: &str) -> Option<(&str, &str)> {
    let dot = signature.find(";.")?;
    Some((&signature[..dot + 1], &signature[dot + 2..]))
}

/// Reverse call graph: method → callers to re-queue when the method's
/// model grows.
#[derive(Debug, Default)]
pub struct Dependencies {
    dependents: FxHashMap<MethodHandle, Vec<MethodHandle>>,
}

impl Dependencies {
    pub fn build(call_graph: &CallGraph) -> Self {
        let mut dependents: FxHashMap<MethodHandle, Vec<MethodHandle>> =
            FxHashMap::default();
        for ((caller, _), target) in call_graph.iter() {
            for callee in target
                .resolved_base
                .iter()
                .chain(target.overrides.iter())
            {
                dependents.entry(*callee).or_default().push(*caller);
            }
        }
        for callers in dependents.values_mut() {
            callers.sort_by_key(|method| method.signature());
            callers.dedup();
        }
        Dependencies { dependents }
    }

    /// The callers that must re-run when `method`'s model grows.
    pub fn dependents(&self, method: MethodHandle) -> &[MethodHandle] {
        self.dependents
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_signature_parses_class_and_proto() {
        assert_eq!(
            split_signature("LFoo;.bar:(LData;)V"),
            Some(("LFoo;", "bar:(LData;)V"))
        );
        assert_eq!(split_signature("garbage"), None);
    }
}
