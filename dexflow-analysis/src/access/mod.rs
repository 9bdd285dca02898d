//! Access paths: roots, path elements and interned `(root, path)` pairs.
//!
//! A port on a method's interface is an access path rooted at `Return`,
//! an argument, or one of the leaf/connection-point sentinels. The string
//! syntax is `Argument(1).field[index][*]`.

use std::fmt;

use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::interner::{Interned, Interner};

/// Integer type representing a register number.
pub type Register = u32;

/// Integer type representing a parameter number.
pub type ParameterPosition = u32;

/// The root of an access path.
///
/// Encoded as an unsigned integer: arguments occupy `[0, MAX_ARGUMENT]`,
/// the named sentinels sit at the top of the range. Equality and hashing
/// are on the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Root(u32);

const ROOT_RETURN: u32 = u32::MAX;
const ROOT_LEAF: u32 = u32::MAX - 1;
const ROOT_ANCHOR: u32 = u32::MAX - 2;
const ROOT_PRODUCER: u32 = u32::MAX - 3;
const ROOT_CANONICAL_THIS: u32 = u32::MAX - 4;
const ROOT_CALL_EFFECT: u32 = u32::MAX - 5;
const ROOT_MAX_ARGUMENT: u32 = u32::MAX - 6;

impl Root {
    pub fn argument(position: ParameterPosition) -> Self {
        debug_assert!(position <= ROOT_MAX_ARGUMENT);
        Root(position)
    }

    pub fn return_value() -> Self {
        Root(ROOT_RETURN)
    }

    /// Callee port of a leaf frame.
    pub fn leaf() -> Self {
        Root(ROOT_LEAF)
    }

    /// Connection point for flows this analysis detected and exports.
    pub fn anchor() -> Self {
        Root(ROOT_ANCHOR)
    }

    /// Connection point for flows detected by another analyzer.
    pub fn producer() -> Self {
        Root(ROOT_PRODUCER)
    }

    /// The receiver as seen by other codebases, where `this` has index
    /// -1 and cannot be represented by the unsigned argument encoding.
    pub fn canonical_this() -> Self {
        Root(ROOT_CANONICAL_THIS)
    }

    pub fn call_effect() -> Self {
        Root(ROOT_CALL_EFFECT)
    }

    pub fn is_argument(self) -> bool {
        self.0 <= ROOT_MAX_ARGUMENT
    }

    pub fn is_return(self) -> bool {
        self.0 == ROOT_RETURN
    }

    pub fn is_leaf(self) -> bool {
        self.0 == ROOT_LEAF
    }

    pub fn is_anchor(self) -> bool {
        self.0 == ROOT_ANCHOR
    }

    pub fn is_producer(self) -> bool {
        self.0 == ROOT_PRODUCER
    }

    pub fn is_call_effect(self) -> bool {
        self.0 == ROOT_CALL_EFFECT
    }

    /// Is it used as the callee port of a leaf frame?
    pub fn is_leaf_port(self) -> bool {
        matches!(self.0, ROOT_LEAF | ROOT_ANCHOR | ROOT_PRODUCER)
    }

    pub fn parameter_position(self) -> ParameterPosition {
        debug_assert!(self.is_argument());
        self.0
    }

    pub fn encode(self) -> u32 {
        self.0
    }

    pub fn decode(value: u32) -> Self {
        Root(value)
    }

    /// Parse from the string form used in model JSON.
    pub fn parse(string: &str) -> Option<Root> {
        match string {
            "Return" => Some(Root::return_value()),
            "Leaf" => Some(Root::leaf()),
            "Anchor" => Some(Root::anchor()),
            "Producer" => Some(Root::producer()),
            "CanonicalThis" => Some(Root::canonical_this()),
            "CallEffect" => Some(Root::call_effect()),
            _ => {
                let position = string
                    .strip_prefix("Argument(")?
                    .strip_suffix(')')?
                    .parse::<ParameterPosition>()
                    .ok()?;
                (position <= ROOT_MAX_ARGUMENT).then(|| Root::argument(position))
            }
        }
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ROOT_RETURN => write!(f, "Return"),
            ROOT_LEAF => write!(f, "Leaf"),
            ROOT_ANCHOR => write!(f, "Anchor"),
            ROOT_PRODUCER => write!(f, "Producer"),
            ROOT_CANONICAL_THIS => write!(f, "CanonicalThis"),
            ROOT_CALL_EFFECT => write!(f, "CallEffect"),
            position => write!(f, "Argument({position})"),
        }
    }
}

impl Serialize for Root {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Root {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        Root::parse(&string)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid root `{string}`")))
    }
}

/// One step of an access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathElement {
    /// A named instance field.
    Field(Spur),
    /// A known index into a keyed container.
    Index(Spur),
    /// Any index into a keyed container.
    AnyIndex,
    /// An index whose value is the string constant passed at the given
    /// argument; materialized into `Index` at call sites.
    IndexFromValueOf(Root),
}

impl PathElement {
    pub fn field(name: Spur) -> Self {
        PathElement::Field(name)
    }

    pub fn index(name: Spur) -> Self {
        PathElement::Index(name)
    }

    pub fn any_index() -> Self {
        PathElement::AnyIndex
    }

    pub fn index_from_value_of(root: Root) -> Self {
        debug_assert!(root.is_argument());
        PathElement::IndexFromValueOf(root)
    }

    pub fn is_field(self) -> bool {
        matches!(self, PathElement::Field(_))
    }

    pub fn is_index(self) -> bool {
        matches!(self, PathElement::Index(_))
    }

    pub fn name(self) -> Option<Spur> {
        match self {
            PathElement::Field(name) | PathElement::Index(name) => Some(name),
            _ => None,
        }
    }

    /// Materialize `IndexFromValueOf` against the constant arguments at
    /// a call site. Unknown constants widen to `AnyIndex`.
    pub fn resolve_index_from_value_of(
        self,
        source_constant_arguments: &[Option<String>],
        strings: &ThreadedRodeo,
    ) -> PathElement {
        match self {
            PathElement::IndexFromValueOf(root) => {
                let position = root.parameter_position() as usize;
                match source_constant_arguments.get(position) {
                    Some(Some(constant)) => {
                        PathElement::Index(strings.get_or_intern(constant))
                    }
                    _ => PathElement::AnyIndex,
                }
            }
            element => element,
        }
    }

    pub fn to_string_with(self, strings: &ThreadedRodeo) -> String {
        match self {
            PathElement::Field(name) => format!(".{}", strings.resolve(&name)),
            PathElement::Index(name) => format!("[{}]", strings.resolve(&name)),
            PathElement::AnyIndex => "[*]".to_string(),
            PathElement::IndexFromValueOf(root) => format!("[<{root}>]"),
        }
    }
}

/// The path of an access path, without the root, e.g. `x.y.z`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    elements: SmallVec<[PathElement; 4]>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: impl IntoIterator<Item = PathElement>) -> Self {
        Path {
            elements: elements.into_iter().collect(),
        }
    }

    pub fn append(&mut self, element: PathElement) {
        self.elements.push(element);
    }

    pub fn extend(&mut self, other: &Path) {
        self.elements.extend(other.elements.iter().copied());
    }

    pub fn pop_back(&mut self) {
        self.elements.pop();
    }

    pub fn truncate(&mut self, max_size: usize) {
        self.elements.truncate(max_size);
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = PathElement> + '_ {
        self.elements.iter().copied()
    }

    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.len() <= other.len()
            && self.elements.iter().zip(other.elements.iter()).all(|(a, b)| a == b)
    }

    pub fn reduce_to_common_prefix(&mut self, other: &Path) {
        let common = self
            .elements
            .iter()
            .zip(other.elements.iter())
            .take_while(|(a, b)| a == b)
            .count();
        self.elements.truncate(common);
    }

    /// Resolve all `IndexFromValueOf` elements against the constant
    /// arguments at a call site.
    pub fn resolve(
        &self,
        source_constant_arguments: &[Option<String>],
        strings: &ThreadedRodeo,
    ) -> Path {
        Path {
            elements: self
                .elements
                .iter()
                .map(|element| {
                    element.resolve_index_from_value_of(source_constant_arguments, strings)
                })
                .collect(),
        }
    }

    pub fn to_string_with(&self, strings: &ThreadedRodeo) -> String {
        self.elements
            .iter()
            .map(|element| element.to_string_with(strings))
            .collect()
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path {
            elements: iter.into_iter().collect(),
        }
    }
}

/// An access path: a root and a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPath {
    root: Root,
    path: Path,
}

/// Stable handle to an interned access path.
pub type AccessPathHandle = Interned<AccessPath>;

impl AccessPath {
    pub fn new(root: Root, path: Path) -> Self {
        AccessPath { root, path }
    }

    pub fn from_root(root: Root) -> Self {
        AccessPath {
            root,
            path: Path::new(),
        }
    }

    pub fn root(&self) -> Root {
        self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, element: PathElement) {
        self.path.append(element);
    }

    pub fn extend(&mut self, path: &Path) {
        self.path.extend(path);
    }

    pub fn pop_back(&mut self) {
        self.path.pop_back();
    }

    pub fn truncate(&mut self, max_size: usize) {
        self.path.truncate(max_size);
    }

    /// Weakest common approximation: same root required, path reduced to
    /// the common prefix.
    pub fn join_with(&mut self, other: &AccessPath) {
        debug_assert_eq!(self.root, other.root);
        self.path.reduce_to_common_prefix(&other.path);
    }

    pub fn leq(&self, other: &AccessPath) -> bool {
        self.root == other.root && other.path.is_prefix_of(&self.path)
    }

    /// The canonical port for cross-codebase connection points: the
    /// original port is folded under an `Anchor` root.
    pub fn canonicalize_for_method(&self, strings: &ThreadedRodeo) -> AccessPath {
        let mut path = Path::new();
        path.append(PathElement::field(
            strings.get_or_intern(self.root.to_string()),
        ));
        AccessPath {
            root: Root::anchor(),
            path,
        }
    }

    /// Parse the string syntax `Argument(1).x[y][*]`.
    pub fn parse(string: &str, strings: &ThreadedRodeo) -> Option<AccessPath> {
        let root_end = string
            .find(['.', '['])
            .unwrap_or(string.len());
        let root = Root::parse(&string[..root_end])?;
        let mut path = Path::new();
        let mut rest = &string[root_end..];
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                if end == 0 {
                    return None;
                }
                path.append(PathElement::field(strings.get_or_intern(&after[..end])));
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']')?;
                let name = &after[..end];
                if name == "*" {
                    path.append(PathElement::any_index());
                } else if let Some(inner) = name.strip_prefix('<').and_then(|n| n.strip_suffix('>'))
                {
                    path.append(PathElement::index_from_value_of(Root::parse(inner)?));
                } else {
                    path.append(PathElement::index(strings.get_or_intern(name)));
                }
                rest = &after[end + 1..];
            } else {
                return None;
            }
        }
        Some(AccessPath { root, path })
    }

    pub fn to_string_with(&self, strings: &ThreadedRodeo) -> String {
        format!("{}{}", self.root, self.path.to_string_with(strings))
    }
}

/// Interner for access paths; handle equality is semantic equality.
pub struct AccessPathFactory {
    interner: Interner<AccessPath>,
}

impl AccessPathFactory {
    pub fn new() -> Self {
        Self {
            interner: Interner::new(),
        }
    }

    pub fn get(&self, access_path: AccessPath) -> AccessPathHandle {
        self.interner.intern(access_path)
    }

    pub fn from_root(&self, root: Root) -> AccessPathHandle {
        self.get(AccessPath::from_root(root))
    }
}

impl Default for AccessPathFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_encoding_round_trips() {
        for root in [
            Root::argument(0),
            Root::argument(7),
            Root::return_value(),
            Root::leaf(),
            Root::anchor(),
            Root::producer(),
            Root::canonical_this(),
            Root::call_effect(),
        ] {
            assert_eq!(Root::decode(root.encode()), root);
            assert_eq!(Root::parse(&root.to_string()), Some(root));
        }
    }

    #[test]
    fn root_predicates() {
        assert!(Root::argument(3).is_argument());
        assert!(!Root::return_value().is_argument());
        assert!(Root::leaf().is_leaf_port());
        assert!(Root::anchor().is_leaf_port());
        assert!(Root::producer().is_leaf_port());
        assert!(!Root::return_value().is_leaf_port());
    }

    #[test]
    fn path_prefix_and_common_prefix() {
        let strings = ThreadedRodeo::new();
        let x = PathElement::field(strings.get_or_intern("x"));
        let y = PathElement::field(strings.get_or_intern("y"));
        let z = PathElement::field(strings.get_or_intern("z"));

        let xy = Path::from_elements([x, y]);
        let xyz = Path::from_elements([x, y, z]);
        let xz = Path::from_elements([x, z]);

        assert!(xy.is_prefix_of(&xyz));
        assert!(!xyz.is_prefix_of(&xy));
        assert!(!xz.is_prefix_of(&xyz));

        let mut reduced = xyz.clone();
        reduced.reduce_to_common_prefix(&xz);
        assert_eq!(reduced, Path::from_elements([x]));
    }

    #[test]
    fn parse_and_display_round_trip() {
        let strings = ThreadedRodeo::new();
        for syntax in [
            "Return",
            "Argument(1)",
            "Argument(1).x",
            "Argument(0).x.y",
            "Argument(2)[key]",
            "Argument(2)[*].x",
            "Argument(1)[<Argument(2)>]",
        ] {
            let parsed = AccessPath::parse(syntax, &strings).unwrap();
            assert_eq!(parsed.to_string_with(&strings), syntax);
        }
        assert!(AccessPath::parse("Bogus(1)", &strings).is_none());
        assert!(AccessPath::parse("Return..x", &strings).is_none());
    }

    #[test]
    fn index_from_value_of_resolution() {
        let strings = ThreadedRodeo::new();
        let element = PathElement::index_from_value_of(Root::argument(1));

        let resolved = element.resolve_index_from_value_of(
            &[None, Some("key".to_string())],
            &strings,
        );
        assert_eq!(resolved, PathElement::index(strings.get_or_intern("key")));

        let unresolved = element.resolve_index_from_value_of(&[None, None], &strings);
        assert_eq!(unresolved, PathElement::any_index());
    }

    #[test]
    fn access_path_leq_and_join() {
        let strings = ThreadedRodeo::new();
        let base = AccessPath::parse("Argument(1)", &strings).unwrap();
        let deeper = AccessPath::parse("Argument(1).x.y", &strings).unwrap();

        assert!(deeper.leq(&base));
        assert!(!base.leq(&deeper));

        let mut joined = deeper.clone();
        joined.join_with(&AccessPath::parse("Argument(1).x.z", &strings).unwrap());
        assert_eq!(joined, AccessPath::parse("Argument(1).x", &strings).unwrap());
    }

    #[test]
    fn interned_access_paths_compare_by_pointer() {
        let strings = ThreadedRodeo::new();
        let factory = AccessPathFactory::new();
        let a = factory.get(AccessPath::parse("Argument(1).x", &strings).unwrap());
        let b = factory.get(AccessPath::parse("Argument(1).x", &strings).unwrap());
        let c = factory.get(AccessPath::parse("Argument(1).y", &strings).unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
