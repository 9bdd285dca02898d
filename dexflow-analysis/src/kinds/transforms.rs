//! Transforms: named operators applied to a kind as it flows through
//! code, and sanitizer transforms that erase matching kinds.

use std::collections::BTreeSet;

use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Serialize};

use super::kind::KindHandle;
use crate::interner::{Interned, Interner};

/// What a sanitizer erases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizerKind {
    Sources,
    Sinks,
    Propagations,
}

/// Direction a transform list is applied in: `Forward` when taint flows
/// from a source towards the current method, `Backward` when sink taint
/// flows from the current method towards a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    Forward,
    Backward,
}

/// A single transform token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Transform {
    /// A named operator, e.g. `decode`.
    Named(Spur),
    /// A sanitizer that erases the given kinds (`None` erases all kinds
    /// of the matching sanitizer kind).
    Sanitize {
        sanitizer_kind: SanitizerKind,
        kinds: Option<BTreeSet<KindHandle>>,
    },
}

pub type TransformHandle = Interned<Transform>;

impl Transform {
    pub fn is_sanitizer(&self) -> bool {
        matches!(self, Transform::Sanitize { .. })
    }

    /// Whether this sanitizer erases `kind` when applied in `direction`.
    fn sanitizes(&self, kind: KindHandle, direction: TransformDirection) -> bool {
        match self {
            Transform::Named(_) => false,
            Transform::Sanitize {
                sanitizer_kind,
                kinds,
            } => {
                let direction_matches = match sanitizer_kind {
                    SanitizerKind::Sources => direction == TransformDirection::Forward,
                    SanitizerKind::Sinks => direction == TransformDirection::Backward,
                    SanitizerKind::Propagations => true,
                };
                direction_matches
                    && kinds
                        .as_ref()
                        .map_or(true, |kinds| kinds.contains(&kind.discard_transforms()))
            }
        }
    }

    /// Whether this sanitizer could ever match in `direction`.
    fn applies_in(&self, direction: TransformDirection) -> bool {
        match self {
            Transform::Named(_) => true,
            Transform::Sanitize { sanitizer_kind, .. } => match sanitizer_kind {
                SanitizerKind::Sources => direction == TransformDirection::Forward,
                SanitizerKind::Sinks => direction == TransformDirection::Backward,
                SanitizerKind::Propagations => true,
            },
        }
    }

    pub fn to_string_with(&self, strings: &ThreadedRodeo) -> String {
        match self {
            Transform::Named(name) => strings.resolve(name).to_string(),
            Transform::Sanitize { sanitizer_kind, kinds } => {
                let scope = match kinds {
                    None => "*".to_string(),
                    Some(kinds) => kinds
                        .iter()
                        .map(|kind| kind.to_string_with(strings))
                        .collect::<Vec<_>>()
                        .join("|"),
                };
                format!("sanitize<{sanitizer_kind:?}>[{scope}]")
            }
        }
    }
}

/// A canonical ordered sequence of transforms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TransformList {
    transforms: Vec<TransformHandle>,
}

pub type TransformListHandle = Interned<TransformList>;

impl TransformList {
    pub fn new(transforms: Vec<TransformHandle>) -> Self {
        TransformList { transforms }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = TransformHandle> + '_ {
        self.transforms.iter().copied()
    }

    /// Whether applying this list in `direction` erases `base_kind`.
    pub fn sanitizes(&self, base_kind: KindHandle, direction: TransformDirection) -> bool {
        self.transforms
            .iter()
            .any(|transform| transform.sanitizes(base_kind, direction))
    }

    /// Whether the list contains anything other than sanitizers.
    pub fn has_non_sanitize_transform(&self) -> bool {
        self.transforms.iter().any(|transform| !transform.is_sanitizer())
    }

    pub fn to_string_with(&self, strings: &ThreadedRodeo) -> String {
        self.transforms
            .iter()
            .map(|transform| transform.to_string_with(strings))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Interner for transforms and transform lists.
pub struct TransformsFactory {
    transforms: Interner<Transform>,
    lists: Interner<TransformList>,
}

impl TransformsFactory {
    pub fn new() -> Self {
        Self {
            transforms: Interner::new(),
            lists: Interner::new(),
        }
    }

    pub fn named(&self, name: Spur) -> TransformHandle {
        self.transforms.intern(Transform::Named(name))
    }

    pub fn sanitizer(
        &self,
        sanitizer_kind: SanitizerKind,
        kinds: Option<BTreeSet<KindHandle>>,
    ) -> TransformHandle {
        self.transforms.intern(Transform::Sanitize {
            sanitizer_kind,
            kinds,
        })
    }

    /// Intern a list as-is. Returns `None` for the empty list so that
    /// "no transforms" has a single representation.
    pub fn create(&self, list: TransformList) -> Option<TransformListHandle> {
        if list.is_empty() {
            return None;
        }
        Some(self.lists.intern(list))
    }

    /// Concatenate two optional lists.
    pub fn concat(
        &self,
        left: Option<TransformListHandle>,
        right: Option<TransformListHandle>,
    ) -> Option<TransformListHandle> {
        match (left, right) {
            (None, None) => None,
            (Some(list), None) | (None, Some(list)) => Some(list),
            (Some(left), Some(right)) => {
                let mut transforms = left.transforms.clone();
                transforms.extend(right.transforms.iter().copied());
                self.create(TransformList::new(transforms))
            }
        }
    }

    /// Canonicalize: drop consecutive duplicate sanitizers, keeping the
    /// first occurrence. Named transforms are order-significant and kept.
    pub fn canonicalize(&self, list: &TransformList) -> Option<TransformListHandle> {
        let mut transforms: Vec<TransformHandle> = Vec::with_capacity(list.len());
        for transform in list.iter() {
            if transform.is_sanitizer() && transforms.last() == Some(&transform) {
                continue;
            }
            transforms.push(transform);
        }
        self.create(TransformList::new(transforms))
    }

    /// Drop sanitizers that can never match in `direction`.
    pub fn discard_unmatched_sanitizers(
        &self,
        list: &TransformList,
        direction: TransformDirection,
    ) -> TransformList {
        TransformList::new(
            list.iter()
                .filter(|transform| transform.applies_in(direction))
                .collect(),
        )
    }

    /// Remove sanitizers from `list` that already appear in `global`.
    pub fn filter_global_sanitizers(
        &self,
        list: &TransformList,
        global: TransformListHandle,
    ) -> TransformList {
        TransformList::new(
            list.iter()
                .filter(|transform| {
                    !transform.is_sanitizer() || !global.transforms.contains(transform)
                })
                .collect(),
        )
    }
}

impl Default for TransformsFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::KindFactory;

    #[test]
    fn concat_and_canonicalize() {
        let strings = ThreadedRodeo::new();
        let factory = TransformsFactory::new();
        let decode = factory.named(strings.get_or_intern("decode"));
        let escape = factory.named(strings.get_or_intern("escape"));

        let left = factory
            .create(TransformList::new(vec![decode]))
            .unwrap();
        let right = factory
            .create(TransformList::new(vec![escape]))
            .unwrap();

        let both = factory.concat(Some(left), Some(right)).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(factory.concat(Some(left), None), Some(left));
        assert_eq!(factory.concat(None, None), None);

        let sanitizer = factory.sanitizer(SanitizerKind::Sources, None);
        let noisy = TransformList::new(vec![sanitizer, sanitizer, decode, sanitizer]);
        let canonical = factory.canonicalize(&noisy).unwrap();
        assert_eq!(canonical.len(), 3);
    }

    #[test]
    fn sanitizer_matches_by_direction_and_kind() {
        let strings = ThreadedRodeo::new();
        let transforms = TransformsFactory::new();
        let kinds = KindFactory::new();
        let secret = kinds.named(strings.get_or_intern("Secret"));
        let other = kinds.named(strings.get_or_intern("Other"));

        let all_sources = transforms.sanitizer(SanitizerKind::Sources, None);
        let only_secret = transforms.sanitizer(
            SanitizerKind::Sources,
            Some(BTreeSet::from([secret])),
        );
        let list = TransformList::new(vec![all_sources]);
        assert!(list.sanitizes(secret, TransformDirection::Forward));
        assert!(!list.sanitizes(secret, TransformDirection::Backward));

        let scoped = TransformList::new(vec![only_secret]);
        assert!(scoped.sanitizes(secret, TransformDirection::Forward));
        assert!(!scoped.sanitizes(other, TransformDirection::Forward));
    }

    #[test]
    fn discard_unmatched_sanitizers_drops_wrong_direction() {
        let transforms = TransformsFactory::new();
        let sources = transforms.sanitizer(SanitizerKind::Sources, None);
        let sinks = transforms.sanitizer(SanitizerKind::Sinks, None);

        let list = TransformList::new(vec![sources, sinks]);
        let forward =
            transforms.discard_unmatched_sanitizers(&list, TransformDirection::Forward);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward.iter().next(), Some(sources));
    }
}
