//! An abstract tree domain indexed by access paths.
//!
//! A value written at a path covers every extension of that path: a tree
//! subsumes its prefixes. Reading down a path therefore yields the join
//! of all prefixes' values; the `read_with` variant folds a propagation
//! function across each step, which backward propagation uses to append
//! output path elements while descending.

use rustc_hash::FxHashMap;

use super::lattice::{AbstractDomain, UpdateKind};
use crate::access::{Path, PathElement};

/// How far a propagation may keep input paths before collapsing.
///
/// Join takes the maximum; reading one step deeper decrements. A depth
/// of zero means "collapse everything written through this propagation";
/// the maximum depth disables collapsing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseDepth {
    Bottom,
    Depth(u32),
}

impl CollapseDepth {
    pub const NO_COLLAPSE: u32 = u32::MAX;

    pub fn new(depth: u32) -> Self {
        CollapseDepth::Depth(depth)
    }

    pub fn zero() -> Self {
        CollapseDepth::Depth(0)
    }

    pub fn no_collapse() -> Self {
        CollapseDepth::Depth(Self::NO_COLLAPSE)
    }

    pub fn is_zero(self) -> bool {
        matches!(self, CollapseDepth::Depth(0))
    }

    pub fn should_collapse(self) -> bool {
        match self {
            CollapseDepth::Bottom => false,
            CollapseDepth::Depth(depth) => depth != Self::NO_COLLAPSE,
        }
    }

    pub fn decrement(self) -> Self {
        match self {
            CollapseDepth::Bottom => CollapseDepth::Bottom,
            CollapseDepth::Depth(Self::NO_COLLAPSE) => self,
            CollapseDepth::Depth(depth) => CollapseDepth::Depth(depth.saturating_sub(1)),
        }
    }

    pub fn value(self) -> Option<u32> {
        match self {
            CollapseDepth::Bottom => None,
            CollapseDepth::Depth(depth) => Some(depth),
        }
    }
}

impl AbstractDomain for CollapseDepth {
    fn bottom() -> Self {
        CollapseDepth::Bottom
    }

    fn is_bottom(&self) -> bool {
        matches!(self, CollapseDepth::Bottom)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (CollapseDepth::Bottom, _) => true,
            (_, CollapseDepth::Bottom) => false,
            (CollapseDepth::Depth(a), CollapseDepth::Depth(b)) => a <= b,
        }
    }

    fn join_with(&mut self, other: Self) {
        match (&*self, &other) {
            (CollapseDepth::Bottom, _) => *self = other,
            (_, CollapseDepth::Bottom) => {}
            (CollapseDepth::Depth(a), CollapseDepth::Depth(b)) => {
                *self = CollapseDepth::Depth(*a.max(b));
            }
        }
    }

    fn meet_with(&mut self, other: Self) {
        match (&*self, &other) {
            (CollapseDepth::Bottom, _) => {}
            (_, CollapseDepth::Bottom) => *self = CollapseDepth::Bottom,
            (CollapseDepth::Depth(a), CollapseDepth::Depth(b)) => {
                *self = CollapseDepth::Depth(*a.min(b));
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Node<V> {
    value: V,
    children: FxHashMap<PathElement, Node<V>>,
}

impl<V: AbstractDomain> Node<V> {
    fn bottom() -> Self {
        Node {
            value: V::bottom(),
            children: FxHashMap::default(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.value.is_bottom() && self.children.is_empty()
    }

    /// Whether every value in the subtree is covered by `inherited`.
    fn subtree_leq_value(&self, inherited: &V) -> bool {
        self.value.leq(inherited)
            && self
                .children
                .values()
                .all(|child| child.subtree_leq_value(inherited))
    }

    /// Remove children made redundant by values inherited from ancestors.
    fn prune(&mut self, inherited: &V) {
        let mut effective = inherited.clone();
        effective.join_with(self.value.clone());
        self.children.retain(|_, child| {
            if child.subtree_leq_value(&effective) {
                return false;
            }
            child.prune(&effective);
            true
        });
    }

    fn join_with(&mut self, other: Node<V>) {
        self.value.join_with(other.value);
        for (element, child) in other.children {
            match self.children.get_mut(&element) {
                Some(existing) => existing.join_with(child),
                None => {
                    self.children.insert(element, child);
                }
            }
        }
    }

    fn leq(&self, self_inherited: &V, other: Option<&Node<V>>, other_inherited: &V) -> bool {
        let mut self_effective = self_inherited.clone();
        self_effective.join_with(self.value.clone());

        let mut other_effective = other_inherited.clone();
        if let Some(other_node) = other {
            other_effective.join_with(other_node.value.clone());
        }

        if !self_effective.leq(&other_effective) {
            return false;
        }

        self.children.iter().all(|(element, child)| {
            let other_child = other.and_then(|node| node.children.get(element));
            child.leq(&self_effective, other_child, &other_effective)
        })
    }

    fn collapse_into(&mut self, value: &mut V, transform: &impl Fn(&mut V)) {
        let mut folded = std::mem::replace(&mut self.value, V::bottom());
        transform(&mut folded);
        value.join_with(folded);
        for (_, mut child) in std::mem::take(&mut self.children) {
            child.collapse_into(value, transform);
        }
    }

    fn collapse_deeper_than(&mut self, height: usize, transform: &impl Fn(&mut V)) {
        if height == 0 {
            let mut collapsed = V::bottom();
            for (_, mut child) in std::mem::take(&mut self.children) {
                child.collapse_into(&mut collapsed, transform);
            }
            self.value.join_with(collapsed);
        } else {
            for child in self.children.values_mut() {
                child.collapse_deeper_than(height - 1, transform);
            }
        }
    }

    fn depth(&self) -> usize {
        self.children
            .values()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    fn leaf_count(&self) -> usize {
        if self.children.is_empty() {
            1
        } else {
            self.children.values().map(Node::leaf_count).sum()
        }
    }

    fn visit<'a>(&'a self, path: &mut Path, out: &mut Vec<(Path, &'a V)>) {
        if !self.value.is_bottom() {
            out.push((path.clone(), &self.value));
        }
        let mut elements: Vec<PathElement> = self.children.keys().copied().collect();
        elements.sort_by_key(|element| format!("{element:?}"));
        for element in elements {
            path.append(element);
            self.children[&element].visit(path, out);
            path.pop_back();
        }
    }
}

/// A tree of lattice values indexed by `Path`.
#[derive(Debug, Clone)]
pub struct PathTree<V: AbstractDomain> {
    root: Node<V>,
}

impl<V: AbstractDomain> PathTree<V> {
    pub fn from_value(value: V) -> Self {
        let mut tree = Self::bottom();
        tree.root.value = value;
        tree
    }

    pub fn from_elements(elements: impl IntoIterator<Item = (Path, V)>) -> Self {
        let mut tree = Self::bottom();
        for (path, value) in elements {
            tree.write(&path, value, UpdateKind::Weak);
        }
        tree
    }

    pub fn root_value(&self) -> &V {
        &self.root.value
    }

    /// Write a value at `path`. `Strong` replaces the subtree; `Weak`
    /// joins at the node. Children covered by ancestor values are pruned.
    pub fn write(&mut self, path: &Path, value: V, kind: UpdateKind) {
        let mut node = &mut self.root;
        for element in path.iter() {
            node = node
                .children
                .entry(element)
                .or_insert_with(Node::bottom);
        }
        match kind {
            UpdateKind::Strong => {
                node.children.clear();
                node.value = value;
            }
            UpdateKind::Weak => {
                node.value.join_with(value);
            }
        }
        let inherited = V::bottom();
        self.root.prune(&inherited);
        if self.root.is_bottom() {
            self.set_to_bottom();
        }
    }

    /// Read at `path`: the join of every prefix's value plus the subtree
    /// below. `propagate` is folded over the accumulated value at each
    /// step down.
    pub fn read_with(
        &self,
        path: &Path,
        propagate: impl Fn(V, PathElement) -> V,
    ) -> PathTree<V> {
        let mut accumulated = self.root.value.clone();
        let mut node = Some(&self.root);
        for element in path.iter() {
            accumulated = propagate(accumulated, element);
            node = node.and_then(|current| current.children.get(&element));
            if let Some(current) = node {
                accumulated.join_with(current.value.clone());
            }
        }

        let mut result = PathTree::from_value(accumulated);
        if let Some(current) = node {
            for (element, child) in &current.children {
                result.root.children.insert(*element, child.clone());
            }
        }
        result.root.prune(&V::bottom());
        result
    }

    /// Read at `path` without a propagation function.
    pub fn read(&self, path: &Path) -> PathTree<V> {
        self.read_with(path, |value, _| value)
    }

    /// The exact subtree at `path`, ignoring prefix values.
    pub fn raw_read(&self, path: &Path) -> PathTree<V> {
        let mut node = Some(&self.root);
        for element in path.iter() {
            node = node.and_then(|current| current.children.get(&element));
        }
        match node {
            Some(found) => PathTree {
                root: found.clone(),
            },
            None => PathTree::bottom(),
        }
    }

    /// Join the whole tree into a single value, applying `transform` to
    /// every value folded up from below the root.
    pub fn collapse(&self, transform: impl Fn(&mut V)) -> V {
        let mut collapsed = self.root.value.clone();
        for child in self.root.children.values() {
            let mut child = child.clone();
            child.collapse_into(&mut collapsed, &transform);
        }
        collapsed
    }

    /// Collapse every node deeper than `height` into its ancestor at
    /// that height.
    pub fn collapse_deeper_than(&mut self, height: usize, transform: impl Fn(&mut V)) {
        self.root.collapse_deeper_than(height, &transform);
        self.root.prune(&V::bottom());
    }

    /// Collapse the deepest levels until at most `max_leaves` remain.
    pub fn limit_leaves(&mut self, max_leaves: usize, transform: impl Fn(&mut V)) {
        while self.root.leaf_count() > max_leaves {
            let depth = self.root.depth();
            if depth == 0 {
                return;
            }
            self.collapse_deeper_than(depth - 1, &transform);
        }
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_bottom() {
            0
        } else {
            self.root.leaf_count()
        }
    }

    /// All non-bottom `(path, value)` pairs, in deterministic order.
    pub fn elements(&self) -> Vec<(Path, &V)> {
        let mut out = Vec::new();
        let mut path = Path::new();
        self.root.visit(&mut path, &mut out);
        out
    }

    /// Transform every value in place, pruning bottoms.
    pub fn map(&mut self, f: impl Fn(&mut V) + Copy) {
        fn map_node<V: AbstractDomain>(node: &mut Node<V>, f: impl Fn(&mut V) + Copy) {
            f(&mut node.value);
            for child in node.children.values_mut() {
                map_node(child, f);
            }
            node.children.retain(|_, child| !child.is_bottom());
        }
        map_node(&mut self.root, f);
        self.root.prune(&V::bottom());
    }
}

impl<V: AbstractDomain> AbstractDomain for PathTree<V> {
    fn bottom() -> Self {
        PathTree {
            root: Node::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.root.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.root
            .leq(&V::bottom(), Some(&other.root), &V::bottom())
    }

    fn join_with(&mut self, other: Self) {
        self.root.join_with(other.root);
        self.root.prune(&V::bottom());
    }

    fn widen_with(&mut self, other: Self) {
        self.join_with(other);
    }

    fn meet_with(&mut self, other: Self) {
        fn meet_node<V: AbstractDomain>(
            left: Option<&Node<V>>,
            left_inherited: &V,
            right: Option<&Node<V>>,
            right_inherited: &V,
        ) -> Node<V> {
            let mut left_effective = left_inherited.clone();
            if let Some(node) = left {
                left_effective.join_with(node.value.clone());
            }
            let mut right_effective = right_inherited.clone();
            if let Some(node) = right {
                right_effective.join_with(node.value.clone());
            }

            let mut value = left_effective.clone();
            value.meet_with(right_effective.clone());

            let mut elements: Vec<PathElement> = Vec::new();
            if let Some(node) = left {
                elements.extend(node.children.keys().copied());
            }
            if let Some(node) = right {
                elements.extend(node.children.keys().copied());
            }
            elements.sort_by_key(|element| format!("{element:?}"));
            elements.dedup();

            let mut children = FxHashMap::default();
            for element in elements {
                let child = meet_node(
                    left.and_then(|node| node.children.get(&element)),
                    &left_effective,
                    right.and_then(|node| node.children.get(&element)),
                    &right_effective,
                );
                if !child.is_bottom() {
                    children.insert(element, child);
                }
            }

            Node { value, children }
        }

        let bottom = V::bottom();
        self.root = meet_node(Some(&self.root), &bottom, Some(&other.root), &bottom);
        self.root.prune(&bottom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasso::ThreadedRodeo;

    type Tree = PathTree<CollapseDepth>;

    fn elements(strings: &ThreadedRodeo) -> (PathElement, PathElement, PathElement) {
        (
            PathElement::field(strings.get_or_intern("x")),
            PathElement::field(strings.get_or_intern("y")),
            PathElement::field(strings.get_or_intern("z")),
        )
    }

    #[test]
    fn read_joins_prefixes_with_propagation() {
        let strings = ThreadedRodeo::new();
        let (x, y, _) = elements(&strings);

        let tree = Tree::from_value(CollapseDepth::new(4));
        let read = tree.read_with(&Path::from_elements([x, y]), |value, _| {
            value.decrement()
        });
        assert!(read.root_value().equals(&CollapseDepth::new(2)));
    }

    #[test]
    fn deeper_writes_propagate_less() {
        let strings = ThreadedRodeo::new();
        let (x, y, _) = elements(&strings);

        let mut tree = Tree::from_value(CollapseDepth::new(4));
        tree.write(
            &Path::from_elements([x]),
            CollapseDepth::new(6),
            UpdateKind::Weak,
        );

        // Root decremented twice (4 → 2), the x-node once (6 → 5);
        // the join keeps the larger.
        let read = tree.read_with(&Path::from_elements([x, y]), |value, _| {
            value.decrement()
        });
        assert!(read.root_value().equals(&CollapseDepth::new(5)));
    }

    #[test]
    fn strong_write_replaces_subtree() {
        let strings = ThreadedRodeo::new();
        let (x, y, _) = elements(&strings);

        let mut tree = Tree::bottom();
        tree.write(
            &Path::from_elements([x, y]),
            CollapseDepth::new(3),
            UpdateKind::Weak,
        );
        tree.write(
            &Path::from_elements([x]),
            CollapseDepth::new(1),
            UpdateKind::Strong,
        );

        let read = tree.raw_read(&Path::from_elements([x]));
        assert!(read.root_value().equals(&CollapseDepth::new(1)));
        assert_eq!(tree.elements().len(), 1);
    }

    #[test]
    fn write_prunes_redundant_children() {
        let strings = ThreadedRodeo::new();
        let (x, _, _) = elements(&strings);

        let mut tree = Tree::bottom();
        tree.write(
            &Path::from_elements([x]),
            CollapseDepth::new(2),
            UpdateKind::Weak,
        );
        tree.write(&Path::new(), CollapseDepth::new(5), UpdateKind::Weak);

        // The x-child is covered by the root value.
        assert_eq!(tree.elements().len(), 1);
    }

    #[test]
    fn leq_respects_prefix_subsumption() {
        let strings = ThreadedRodeo::new();
        let (x, _, _) = elements(&strings);

        let root_only = Tree::from_value(CollapseDepth::new(4));
        let mut deeper = Tree::bottom();
        deeper.write(
            &Path::from_elements([x]),
            CollapseDepth::new(4),
            UpdateKind::Weak,
        );

        // A value at the root covers the same value at any path.
        assert!(deeper.leq(&root_only));
        assert!(!root_only.leq(&deeper));
    }

    #[test]
    fn collapse_deeper_than_bounds_depth() {
        let strings = ThreadedRodeo::new();
        let (x, y, z) = elements(&strings);

        let mut tree = Tree::bottom();
        tree.write(
            &Path::from_elements([x, y, z]),
            CollapseDepth::new(7),
            UpdateKind::Weak,
        );
        tree.collapse_deeper_than(1, |_| {});
        assert_eq!(tree.depth(), 1);
        let read = tree.raw_read(&Path::from_elements([x]));
        assert!(read.root_value().equals(&CollapseDepth::new(7)));
    }

    #[test]
    fn limit_leaves_collapses_widest_level() {
        let strings = ThreadedRodeo::new();
        let names: Vec<PathElement> = (0..10)
            .map(|i| PathElement::field(strings.get_or_intern(format!("f{i}"))))
            .collect();

        let mut tree = Tree::bottom();
        for &element in &names {
            tree.write(
                &Path::from_elements([element]),
                CollapseDepth::new(1),
                UpdateKind::Weak,
            );
        }
        assert_eq!(tree.leaf_count(), 10);
        tree.limit_leaves(4, |_| {});
        assert!(tree.leaf_count() <= 4);
    }

    #[test]
    fn join_absorbs_bottom() {
        let strings = ThreadedRodeo::new();
        let (x, _, _) = elements(&strings);

        let mut tree = Tree::bottom();
        tree.write(
            &Path::from_elements([x]),
            CollapseDepth::new(2),
            UpdateKind::Weak,
        );

        let mut joined = Tree::bottom();
        joined.join_with(tree.clone());
        assert!(joined.equals(&tree));
        assert!(Tree::bottom().leq(&tree));
    }
}
