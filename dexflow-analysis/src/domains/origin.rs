//! Origins: the declaring method/field a source or sink was introduced
//! at, preserved through propagation for trace reconstruction.

use lasso::{Spur, ThreadedRodeo};
use rustc_hash::FxHashSet;

use super::lattice::AbstractDomain;
use crate::access::AccessPathHandle;
use crate::ir::{FieldHandle, MethodHandle};

/// Where a leaf taint was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Declared on a method port.
    Method {
        method: MethodHandle,
        port: AccessPathHandle,
    },
    /// Declared on a field.
    Field(FieldHandle),
    /// A cross-codebase connection point, named canonically.
    Crtex {
        canonical_name: Spur,
        port: AccessPathHandle,
    },
    /// Declared on a string literal.
    Literal(Spur),
}

impl Origin {
    pub fn to_string_with(&self, strings: &ThreadedRodeo) -> String {
        match self {
            Origin::Method { method, port } => {
                format!("{}:{}", method.signature(), port.to_string_with(strings))
            }
            Origin::Field(field) => field.signature(),
            Origin::Crtex {
                canonical_name,
                port,
            } => format!(
                "crtex:{}:{}",
                strings.resolve(canonical_name),
                port.to_string_with(strings)
            ),
            Origin::Literal(value) => format!("literal:{}", strings.resolve(value)),
        }
    }
}

/// A joinable set of origins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OriginSet {
    origins: FxHashSet<Origin>,
}

impl OriginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(origin: Origin) -> Self {
        let mut set = Self::new();
        set.add(origin);
        set
    }

    pub fn add(&mut self, origin: Origin) {
        self.origins.insert(origin);
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Origin> + '_ {
        self.origins.iter().copied()
    }

    /// Origin strings, sorted for deterministic output.
    pub fn sorted_strings(&self, strings: &ThreadedRodeo) -> Vec<String> {
        let mut rendered: Vec<String> = self
            .origins
            .iter()
            .map(|origin| origin.to_string_with(strings))
            .collect();
        rendered.sort_unstable();
        rendered
    }
}

impl AbstractDomain for OriginSet {
    fn bottom() -> Self {
        Self::new()
    }

    fn is_bottom(&self) -> bool {
        self.origins.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.origins.is_subset(&other.origins)
    }

    fn join_with(&mut self, other: Self) {
        self.origins.extend(other.origins);
    }

    fn meet_with(&mut self, other: Self) {
        self.origins.retain(|origin| other.origins.contains(origin));
    }
}

/// A canonical name for cross-codebase connection points: either a
/// template awaiting instantiation or an instantiated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalName {
    /// Template with a `%method%` placeholder.
    Template(Spur),
    /// Instantiated against a resolved callee.
    Instantiated(Spur),
}

impl CanonicalName {
    pub fn is_template(self) -> bool {
        matches!(self, CanonicalName::Template(_))
    }

    /// Instantiate a template against the resolved callee. Instantiated
    /// names pass through unchanged.
    pub fn instantiate(
        self,
        callee_signature: &str,
        strings: &ThreadedRodeo,
    ) -> CanonicalName {
        match self {
            CanonicalName::Template(template) => {
                let instantiated = strings
                    .resolve(&template)
                    .replace("%method%", callee_signature);
                CanonicalName::Instantiated(strings.get_or_intern(instantiated))
            }
            instantiated => instantiated,
        }
    }

    pub fn value(self) -> Spur {
        match self {
            CanonicalName::Template(value) | CanonicalName::Instantiated(value) => value,
        }
    }
}

/// A joinable set of canonical names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalNameSet {
    names: FxHashSet<CanonicalName>,
}

impl CanonicalNameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: CanonicalName) {
        self.names.insert(name);
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CanonicalName> + '_ {
        self.names.iter().copied()
    }

    /// Instantiate every template against the resolved callee.
    pub fn instantiate(&self, callee_signature: &str, strings: &ThreadedRodeo) -> Self {
        CanonicalNameSet {
            names: self
                .names
                .iter()
                .map(|name| name.instantiate(callee_signature, strings))
                .collect(),
        }
    }
}

impl AbstractDomain for CanonicalNameSet {
    fn bottom() -> Self {
        Self::new()
    }

    fn is_bottom(&self) -> bool {
        self.names.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.names.is_subset(&other.names)
    }

    fn join_with(&mut self, other: Self) {
        self.names.extend(other.names);
    }

    fn meet_with(&mut self, other: Self) {
        self.names.retain(|name| other.names.contains(name));
    }
}
