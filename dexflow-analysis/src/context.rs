//! The shared analysis context: interning factories and configuration.

use lasso::{Spur, ThreadedRodeo};

use dexflow_core::{Heuristics, Options};

use crate::access::{AccessPath, AccessPathFactory, AccessPathHandle, Root};
use crate::domains::{Feature, FeatureMayAlwaysSet, FeatureSet};
use crate::ir::Positions;
use crate::kinds::{KindFactory, TransformsFactory};

/// Factories and configuration threaded through the whole analysis.
///
/// Everything here is append-only and safe to share across workers.
pub struct AnalysisContext {
    pub strings: ThreadedRodeo,
    pub kinds: KindFactory,
    pub transforms: TransformsFactory,
    pub access_paths: AccessPathFactory,
    pub positions: Positions,
    pub options: Options,
    pub heuristics: Heuristics,
}

impl AnalysisContext {
    pub fn new(options: Options, heuristics: Heuristics) -> Self {
        Self {
            strings: ThreadedRodeo::new(),
            kinds: KindFactory::new(),
            transforms: TransformsFactory::new(),
            access_paths: AccessPathFactory::new(),
            positions: Positions::new(),
            options,
            heuristics,
        }
    }

    /// A context with default options and heuristics, for tests.
    pub fn for_test() -> Self {
        Self::new(Options::default(), Heuristics::default())
    }

    pub fn str(&self, value: &str) -> Spur {
        self.strings.get_or_intern(value)
    }

    pub fn feature(&self, name: &str) -> Feature {
        Feature::new(self.str(name))
    }

    pub fn feature_set(&self, names: &[&str]) -> FeatureSet {
        FeatureSet::from_iter(names.iter().map(|name| self.feature(name)))
    }

    pub fn always_features(&self, names: &[&str]) -> FeatureMayAlwaysSet {
        FeatureMayAlwaysSet::make_always(self.feature_set(names))
    }

    pub fn port(&self, root: Root) -> AccessPathHandle {
        self.access_paths.get(AccessPath::from_root(root))
    }

    pub fn parse_port(&self, syntax: &str) -> Option<AccessPathHandle> {
        AccessPath::parse(syntax, &self.strings).map(|path| self.access_paths.get(path))
    }
}
