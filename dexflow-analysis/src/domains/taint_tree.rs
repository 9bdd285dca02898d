//! Taint indexed by paths (`TaintTree`) and by ports
//! (`TaintAccessPathTree`).

use rustc_hash::FxHashMap;

use super::features::FeatureMayAlwaysSet;
use super::lattice::{AbstractDomain, UpdateKind};
use super::path_tree::{CollapseDepth, PathTree};
use super::taint::Taint;
use crate::access::{AccessPath, Path, Root};
use crate::ir::PositionHandle;

/// An abstract tree of `Taint` indexed by `Path`.
#[derive(Debug, Clone)]
pub struct TaintTree {
    tree: PathTree<Taint>,
}

impl TaintTree {
    pub fn from_taint(taint: Taint) -> Self {
        TaintTree {
            tree: PathTree::from_value(taint),
        }
    }

    pub fn write(&mut self, path: &Path, taint: Taint, kind: UpdateKind) {
        self.tree.write(path, taint, kind);
    }

    pub fn write_tree(&mut self, path: &Path, tree: TaintTree, kind: UpdateKind) {
        match kind {
            UpdateKind::Strong => {
                // Clear the subtree, then join the new tree under it.
                self.tree.write(path, Taint::bottom(), UpdateKind::Strong);
                for (subpath, taint) in tree.tree.elements() {
                    let mut full = path.clone();
                    full.extend(&subpath);
                    self.tree.write(&full, taint.clone(), UpdateKind::Weak);
                }
            }
            UpdateKind::Weak => {
                for (subpath, taint) in tree.tree.elements() {
                    let mut full = path.clone();
                    full.extend(&subpath);
                    self.tree.write(&full, taint.clone(), UpdateKind::Weak);
                }
            }
        }
    }

    /// Read at `path`: the join of every prefix's taint plus the subtree
    /// below.
    pub fn read(&self, path: &Path) -> TaintTree {
        TaintTree {
            tree: self.tree.read(path),
        }
    }

    /// Read while appending each traversed element to propagation output
    /// paths, the backward-taint read.
    pub fn read_with_propagation(&self, path: &Path) -> TaintTree {
        TaintTree {
            tree: self.tree.read_with(path, |mut taint, element| {
                taint.append_to_propagation_output_paths(element);
                taint
            }),
        }
    }

    /// The exact subtree at `path`, without prefix taint.
    pub fn raw_read(&self, path: &Path) -> TaintTree {
        TaintTree {
            tree: self.tree.raw_read(path),
        }
    }

    /// Join the whole tree into one taint, tagging collapsed taint with
    /// the broadening features.
    pub fn collapse(&self, broadening_features: &FeatureMayAlwaysSet) -> Taint {
        self.tree.collapse(|taint| {
            taint.add_locally_inferred_features(broadening_features);
        })
    }

    pub fn collapse_deeper_than(
        &mut self,
        height: usize,
        broadening_features: &FeatureMayAlwaysSet,
    ) {
        self.tree.collapse_deeper_than(height, |taint| {
            taint.add_locally_inferred_features(broadening_features);
        });
    }

    pub fn limit_leaves(
        &mut self,
        max_leaves: usize,
        broadening_features: &FeatureMayAlwaysSet,
    ) {
        self.tree.limit_leaves(max_leaves, |taint| {
            taint.add_locally_inferred_features(broadening_features);
        });
    }

    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_empty() || features.is_bottom() {
            return;
        }
        self.tree.map(|taint| taint.add_locally_inferred_features(features));
    }

    pub fn add_local_position(&mut self, position: PositionHandle) {
        self.tree.map(|taint| taint.add_local_position(position));
    }

    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        self.tree
            .map(|taint| taint.update_maximum_collapse_depth(collapse_depth));
    }

    pub fn map_taint(&mut self, f: impl Fn(&mut Taint) + Copy) {
        self.tree.map(f);
    }

    /// The taint at the root of this tree.
    pub fn root_taint(&self) -> &Taint {
        self.tree.root_value()
    }

    pub fn elements(&self) -> Vec<(Path, &Taint)> {
        self.tree.elements()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }
}

impl AbstractDomain for TaintTree {
    fn bottom() -> Self {
        TaintTree {
            tree: PathTree::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.tree.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.tree.leq(&other.tree)
    }

    fn join_with(&mut self, other: Self) {
        self.tree.join_with(other.tree);
    }

    fn meet_with(&mut self, other: Self) {
        self.tree.meet_with(other.tree);
    }
}

/// Map `Root → TaintTree`; the shape of model generations, parameter
/// sources, sinks and propagations.
#[derive(Debug, Clone, Default)]
pub struct TaintAccessPathTree {
    map: FxHashMap<Root, TaintTree>,
}

impl TaintAccessPathTree {
    pub fn from_entries(
        entries: impl IntoIterator<Item = (AccessPath, Taint)>,
    ) -> Self {
        let mut tree = TaintAccessPathTree::bottom();
        for (access_path, taint) in entries {
            tree.write(&access_path, taint, UpdateKind::Weak);
        }
        tree
    }

    pub fn write(&mut self, access_path: &AccessPath, taint: Taint, kind: UpdateKind) {
        if taint.is_bottom() {
            return;
        }
        self.map
            .entry(access_path.root())
            .or_insert_with(TaintTree::bottom)
            .write(access_path.path(), taint, kind);
        self.drop_bottoms();
    }

    pub fn write_tree(
        &mut self,
        access_path: &AccessPath,
        tree: TaintTree,
        kind: UpdateKind,
    ) {
        self.map
            .entry(access_path.root())
            .or_insert_with(TaintTree::bottom)
            .write_tree(access_path.path(), tree, kind);
        self.drop_bottoms();
    }

    pub fn read(&self, access_path: &AccessPath) -> TaintTree {
        self.map
            .get(&access_path.root())
            .map(|tree| tree.read(access_path.path()))
            .unwrap_or_else(TaintTree::bottom)
    }

    pub fn read_with_propagation(&self, access_path: &AccessPath) -> TaintTree {
        self.map
            .get(&access_path.root())
            .map(|tree| tree.read_with_propagation(access_path.path()))
            .unwrap_or_else(TaintTree::bottom)
    }

    pub fn raw_read(&self, access_path: &AccessPath) -> TaintTree {
        self.map
            .get(&access_path.root())
            .map(|tree| tree.raw_read(access_path.path()))
            .unwrap_or_else(TaintTree::bottom)
    }

    pub fn tree_at(&self, root: Root) -> Option<&TaintTree> {
        self.map.get(&root)
    }

    /// Roots in deterministic (encoding) order.
    pub fn roots(&self) -> Vec<Root> {
        let mut roots: Vec<Root> = self.map.keys().copied().collect();
        roots.sort_by_key(|root| root.encode());
        roots
    }

    /// All `(port, taint)` pairs in deterministic order.
    pub fn elements(&self) -> Vec<(AccessPath, Taint)> {
        let mut result = Vec::new();
        for root in self.roots() {
            for (path, taint) in self.map[&root].elements() {
                result.push((AccessPath::new(root, path), taint.clone()));
            }
        }
        result
    }

    pub fn visit(&self, mut visitor: impl FnMut(Root, &TaintTree)) {
        for root in self.roots() {
            visitor(root, &self.map[&root]);
        }
    }

    pub fn map_trees(&mut self, f: impl Fn(&mut TaintTree)) {
        for tree in self.map.values_mut() {
            f(tree);
        }
        self.drop_bottoms();
    }

    /// Bound each port's tree depth and leaf count, tagging collapsed
    /// taint with the broadening features.
    pub fn shape_with_limits(
        &mut self,
        max_port_depth: usize,
        max_leaves: usize,
        broadening_features: &FeatureMayAlwaysSet,
    ) {
        for tree in self.map.values_mut() {
            if tree.depth() > max_port_depth {
                tree.collapse_deeper_than(max_port_depth, broadening_features);
            }
            tree.limit_leaves(max_leaves, broadening_features);
        }
        self.drop_bottoms();
    }

    fn drop_bottoms(&mut self) {
        self.map.retain(|_, tree| !tree.is_bottom());
    }
}

impl AbstractDomain for TaintAccessPathTree {
    fn bottom() -> Self {
        TaintAccessPathTree {
            map: FxHashMap::default(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.map.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.map.iter().all(|(root, tree)| {
            other
                .map
                .get(root)
                .map_or(false, |other_tree| tree.leq(other_tree))
        })
    }

    fn join_with(&mut self, other: Self) {
        for (root, tree) in other.map {
            self.map
                .entry(root)
                .or_insert_with(TaintTree::bottom)
                .join_with(tree);
        }
    }

    fn meet_with(&mut self, other: Self) {
        let map = std::mem::take(&mut self.map);
        for (root, mut tree) in map {
            if let Some(other_tree) = other.map.get(&root) {
                tree.meet_with(other_tree.clone());
                if !tree.is_bottom() {
                    self.map.insert(root, tree);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPathFactory, PathElement};
    use crate::domains::call_info::CallInfo;
    use crate::domains::frame::Frame;
    use crate::domains::features::{Feature, FeatureSet};
    use crate::kinds::KindFactory;
    use lasso::ThreadedRodeo;

    fn secret_taint(
        strings: &ThreadedRodeo,
        kinds: &KindFactory,
        access_paths: &AccessPathFactory,
    ) -> Taint {
        let kind = kinds.named(strings.get_or_intern("Secret"));
        let port = access_paths.get(AccessPath::from_root(Root::leaf()));
        Taint::from_frame(CallInfo::declaration(port), Frame::leaf(kind))
    }

    #[test]
    fn read_joins_prefix_taint() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let taint = secret_taint(&strings, &kinds, &access_paths);

        let x = PathElement::field(strings.get_or_intern("x"));
        let mut tree = TaintTree::from_taint(taint.clone());
        let read = tree.read(&Path::from_elements([x]));
        assert!(!read.is_bottom());

        // A write below is visible when reading the prefix.
        tree.write(&Path::from_elements([x]), taint, UpdateKind::Weak);
        let at_root = tree.read(&Path::new());
        assert_eq!(at_root.elements().len(), 1);
    }

    #[test]
    fn strong_write_replaces_weak_joins() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();

        let secret = secret_taint(&strings, &kinds, &access_paths);
        let other_kind = kinds.named(strings.get_or_intern("Other"));
        let port = access_paths.get(AccessPath::from_root(Root::leaf()));
        let other = Taint::from_frame(CallInfo::declaration(port), Frame::leaf(other_kind));

        let x = PathElement::field(strings.get_or_intern("x"));
        let path = Path::from_elements([x]);

        let mut tree = TaintTree::bottom();
        tree.write(&path, secret.clone(), UpdateKind::Weak);
        tree.write(&path, other.clone(), UpdateKind::Strong);
        let read = tree.raw_read(&path);
        let kinds_present: Vec<_> = read.elements();
        assert_eq!(kinds_present.len(), 1);
        assert!(kinds_present[0].1.equals(&other));

        tree.write(&path, secret.clone(), UpdateKind::Weak);
        let joined = tree.raw_read(&path);
        assert_eq!(joined.elements()[0].1.kinds().len(), 2);
    }

    #[test]
    fn collapse_adds_broadening_features() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let taint = secret_taint(&strings, &kinds, &access_paths);

        let broadening = FeatureMayAlwaysSet::make_always(FeatureSet::singleton(
            Feature::new(strings.get_or_intern("via-broadening")),
        ));

        let x = PathElement::field(strings.get_or_intern("x"));
        let mut tree = TaintTree::bottom();
        tree.write(&Path::from_elements([x]), taint, UpdateKind::Weak);

        let collapsed = tree.collapse(&broadening);
        let features = collapsed.features_joined();
        assert!(features
            .always()
            .contains(Feature::new(strings.get_or_intern("via-broadening"))));
    }

    #[test]
    fn access_path_tree_separates_roots() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let taint = secret_taint(&strings, &kinds, &access_paths);

        let mut tree = TaintAccessPathTree::bottom();
        tree.write(
            &AccessPath::from_root(Root::return_value()),
            taint.clone(),
            UpdateKind::Weak,
        );
        tree.write(
            &AccessPath::from_root(Root::argument(0)),
            taint,
            UpdateKind::Weak,
        );

        assert_eq!(tree.roots().len(), 2);
        assert!(!tree.read(&AccessPath::from_root(Root::return_value())).is_bottom());
        assert!(tree
            .read(&AccessPath::from_root(Root::argument(1)))
            .is_bottom());
    }

    #[test]
    fn shape_with_limits_bounds_port_trees() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let access_paths = AccessPathFactory::new();
        let taint = secret_taint(&strings, &kinds, &access_paths);
        let broadening = FeatureMayAlwaysSet::empty();

        let mut tree = TaintAccessPathTree::bottom();
        for i in 0..30 {
            let mut access_path = AccessPath::from_root(Root::argument(0));
            access_path.append(PathElement::field(
                strings.get_or_intern(format!("f{i}")),
            ));
            tree.write(&access_path, taint.clone(), UpdateKind::Weak);
        }

        tree.shape_with_limits(4, 10, &broadening);
        let port_tree = tree.tree_at(Root::argument(0)).unwrap();
        assert!(port_tree.leaf_count() <= 10);
    }
}
