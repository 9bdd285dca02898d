//! Features: breadcrumb labels attached to taint as it flows.

use lasso::{Spur, ThreadedRodeo};
use rustc_hash::FxHashSet;

use super::lattice::AbstractDomain;

/// An interned feature label, e.g. `via-obscure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Feature(Spur);

impl Feature {
    pub fn new(name: Spur) -> Self {
        Feature(name)
    }

    pub fn name(self) -> Spur {
        self.0
    }

    pub fn as_str(self, strings: &ThreadedRodeo) -> &str {
        strings.resolve(&self.0)
    }
}

/// A plain set of features.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureSet {
    features: FxHashSet<Feature>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(feature: Feature) -> Self {
        let mut set = Self::new();
        set.add(feature);
        set
    }

    pub fn from_iter(features: impl IntoIterator<Item = Feature>) -> Self {
        FeatureSet {
            features: features.into_iter().collect(),
        }
    }

    pub fn add(&mut self, feature: Feature) {
        self.features.insert(feature);
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }

    pub fn is_subset(&self, other: &FeatureSet) -> bool {
        self.features.is_subset(&other.features)
    }

    pub fn union_with(&mut self, other: &FeatureSet) {
        self.features.extend(other.features.iter().copied());
    }

    pub fn intersect_with(&mut self, other: &FeatureSet) {
        self.features.retain(|feature| other.features.contains(feature));
    }

    /// Feature names, sorted for deterministic output.
    pub fn sorted_names<'a>(&self, strings: &'a ThreadedRodeo) -> Vec<&'a str> {
        let mut names: Vec<&str> = self
            .features
            .iter()
            .map(|feature| feature.as_str(strings))
            .collect();
        names.sort_unstable();
        names
    }
}

impl AbstractDomain for FeatureSet {
    fn bottom() -> Self {
        Self::new()
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.is_subset(other)
    }

    fn join_with(&mut self, other: Self) {
        self.features.extend(other.features);
    }

    fn meet_with(&mut self, other: Self) {
        self.features.retain(|feature| other.features.contains(feature));
    }
}

/// An over/under set of features.
///
/// `always` (under-approximation) holds features present on every flow;
/// `may` (over-approximation) holds features present on some flow. The
/// invariant `always ⊆ may` is maintained. Bottom is distinct from the
/// empty set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMayAlwaysSet {
    bottom: bool,
    may: FeatureSet,
    always: FeatureSet,
}

impl FeatureMayAlwaysSet {
    /// The empty set: no features, but not bottom.
    pub fn empty() -> Self {
        FeatureMayAlwaysSet {
            bottom: false,
            may: FeatureSet::new(),
            always: FeatureSet::new(),
        }
    }

    pub fn make_always(features: FeatureSet) -> Self {
        FeatureMayAlwaysSet {
            bottom: false,
            may: features.clone(),
            always: features,
        }
    }

    pub fn make_may(features: FeatureSet) -> Self {
        FeatureMayAlwaysSet {
            bottom: false,
            may: features,
            always: FeatureSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.bottom && self.may.is_empty() && self.always.is_empty()
    }

    pub fn may(&self) -> &FeatureSet {
        &self.may
    }

    pub fn always(&self) -> &FeatureSet {
        &self.always
    }

    /// Add features from `other`: both sets grow, since the flows of
    /// `other` are known to happen after the flows of `self`.
    pub fn add(&mut self, other: &FeatureMayAlwaysSet) {
        if other.bottom {
            return;
        }
        if self.bottom {
            *self = other.clone();
            return;
        }
        self.may.union_with(&other.may);
        self.always.union_with(&other.always);
    }

    pub fn add_always(&mut self, features: &FeatureSet) {
        if features.is_empty() {
            return;
        }
        if self.bottom {
            *self = FeatureMayAlwaysSet::make_always(features.clone());
            return;
        }
        self.may.union_with(features);
        self.always.union_with(features);
    }

    pub fn add_may(&mut self, features: &FeatureSet) {
        if features.is_empty() {
            return;
        }
        if self.bottom {
            *self = FeatureMayAlwaysSet::make_may(features.clone());
            return;
        }
        self.may.union_with(features);
    }
}

impl AbstractDomain for FeatureMayAlwaysSet {
    fn bottom() -> Self {
        FeatureMayAlwaysSet {
            bottom: true,
            may: FeatureSet::new(),
            always: FeatureSet::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.bottom
    }

    fn leq(&self, other: &Self) -> bool {
        if self.bottom {
            return true;
        }
        if other.bottom {
            return false;
        }
        self.may.is_subset(&other.may) && other.always.is_subset(&self.always)
    }

    fn join_with(&mut self, other: Self) {
        if other.bottom {
            return;
        }
        if self.bottom {
            *self = other;
            return;
        }
        self.may.union_with(&other.may);
        self.always.intersect_with(&other.always);
    }

    fn meet_with(&mut self, other: Self) {
        if self.bottom {
            return;
        }
        if other.bottom {
            self.set_to_bottom();
            return;
        }
        self.may.intersect_with(&other.may);
        self.always.union_with(&other.always);
        if !self.always.is_subset(&self.may) {
            self.set_to_bottom();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(strings: &ThreadedRodeo, name: &str) -> Feature {
        Feature::new(strings.get_or_intern(name))
    }

    #[test]
    fn join_intersects_always_and_unions_may() {
        let strings = ThreadedRodeo::new();
        let a = feature(&strings, "a");
        let b = feature(&strings, "b");

        let mut left = FeatureMayAlwaysSet::make_always(FeatureSet::from_iter([a, b]));
        let right = FeatureMayAlwaysSet::make_always(FeatureSet::from_iter([a]));
        left.join_with(right);

        assert!(left.always().contains(a));
        assert!(!left.always().contains(b));
        assert!(left.may().contains(b));
    }

    #[test]
    fn bottom_absorbs_in_join() {
        let strings = ThreadedRodeo::new();
        let a = feature(&strings, "a");
        let set = FeatureMayAlwaysSet::make_always(FeatureSet::from_iter([a]));

        let mut joined = FeatureMayAlwaysSet::bottom();
        joined.join_with(set.clone());
        assert!(joined.equals(&set));
        assert!(FeatureMayAlwaysSet::bottom().leq(&set));
        assert!(!set.leq(&FeatureMayAlwaysSet::bottom()));
    }

    #[test]
    fn empty_is_not_bottom() {
        assert!(!FeatureMayAlwaysSet::empty().is_bottom());
        assert!(FeatureMayAlwaysSet::empty().is_empty());
        assert!(FeatureMayAlwaysSet::bottom().is_bottom());
    }

    #[test]
    fn add_unions_both_sets() {
        let strings = ThreadedRodeo::new();
        let a = feature(&strings, "a");
        let b = feature(&strings, "b");

        let mut set = FeatureMayAlwaysSet::make_always(FeatureSet::from_iter([a]));
        set.add(&FeatureMayAlwaysSet::make_always(FeatureSet::from_iter([b])));
        assert!(set.always().contains(a));
        assert!(set.always().contains(b));
    }

    #[test]
    fn leq_on_may_always() {
        let strings = ThreadedRodeo::new();
        let a = feature(&strings, "a");

        let always = FeatureMayAlwaysSet::make_always(FeatureSet::from_iter([a]));
        let may = FeatureMayAlwaysSet::make_may(FeatureSet::from_iter([a]));
        // An always-feature is more precise information than a may-feature.
        assert!(always.leq(&may));
        assert!(!may.leq(&always));
    }
}
