//! The closed sum of taint kinds.

use lasso::{Spur, ThreadedRodeo};

use super::transforms::TransformListHandle;
use crate::access::{ParameterPosition, Root};
use crate::interner::{Interned, Interner};

/// A label identifying a class of tainted value (a source kind), a class
/// of dangerous consumer (a sink kind), or a propagation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A user-declared source or sink kind.
    Named(Spur),

    /// One half of a multi-source rule.
    Partial { base: Spur, label: Spur },

    /// A partial kind whose counterpart was seen, tied to the rule that
    /// triggered it.
    Triggered { base: Spur, label: Spur, rule_code: i32 },

    /// A kind wrapped by transform lists. Local transforms were applied
    /// inside the current method; global transforms were applied in
    /// callees and have already been folded into the trace.
    Transform {
        base: KindHandle,
        local_transforms: Option<TransformListHandle>,
        global_transforms: Option<TransformListHandle>,
    },

    /// A propagation to the given output root.
    Propagation(Root),

    /// Propagation to the method's return value.
    LocalReturn,

    /// Propagation to the given argument.
    LocalArgument(ParameterPosition),

    /// Propagation to the receiver (argument 0).
    Receiver,

    /// Propagation to the result register of a call effect.
    LocalResult,
}

pub type KindHandle = Interned<Kind>;

impl Kind {
    pub fn is_named(&self) -> bool {
        matches!(self, Kind::Named(_))
    }

    pub fn is_transform(&self) -> bool {
        matches!(self, Kind::Transform { .. })
    }

    /// Propagation kinds carry an output root instead of a label.
    pub fn is_propagation(&self) -> bool {
        matches!(
            self,
            Kind::Propagation(_)
                | Kind::LocalReturn
                | Kind::LocalArgument(_)
                | Kind::Receiver
                | Kind::LocalResult
        )
    }

    /// The output root of a propagation kind.
    pub fn propagation_root(&self) -> Option<Root> {
        match self {
            Kind::Propagation(root) => Some(*root),
            Kind::LocalReturn | Kind::LocalResult => Some(Root::return_value()),
            Kind::LocalArgument(position) => Some(Root::argument(*position)),
            Kind::Receiver => Some(Root::argument(0)),
            _ => None,
        }
    }

    pub fn to_string_with(&self, strings: &ThreadedRodeo) -> String {
        match self {
            Kind::Named(name) => strings.resolve(name).to_string(),
            Kind::Partial { base, label } => format!(
                "Partial:{}:{}",
                strings.resolve(base),
                strings.resolve(label)
            ),
            Kind::Triggered { base, label, rule_code } => format!(
                "Triggered:{}:{}#{}",
                strings.resolve(base),
                strings.resolve(label),
                rule_code
            ),
            Kind::Transform {
                base,
                local_transforms,
                global_transforms,
            } => {
                let local = local_transforms
                    .map(|list| list.to_string_with(strings))
                    .unwrap_or_default();
                let global = global_transforms
                    .map(|list| list.to_string_with(strings))
                    .unwrap_or_default();
                format!("{}@{}:{}", local, global, base.to_string_with(strings))
            }
            Kind::Propagation(root) => format!("Propagation:{root}"),
            Kind::LocalReturn => "LocalReturn".to_string(),
            Kind::LocalArgument(position) => format!("LocalArgument({position})"),
            Kind::Receiver => "Receiver".to_string(),
            Kind::LocalResult => "LocalResult".to_string(),
        }
    }
}

impl KindHandle {
    /// The kind with all transform wrappers removed.
    pub fn discard_transforms(self) -> KindHandle {
        match &*self {
            Kind::Transform { base, .. } => base.discard_transforms(),
            _ => self,
        }
    }
}

/// Interner for kinds.
pub struct KindFactory {
    interner: Interner<Kind>,
}

impl KindFactory {
    pub fn new() -> Self {
        Self {
            interner: Interner::new(),
        }
    }

    pub fn named(&self, name: Spur) -> KindHandle {
        self.interner.intern(Kind::Named(name))
    }

    pub fn partial(&self, base: Spur, label: Spur) -> KindHandle {
        self.interner.intern(Kind::Partial { base, label })
    }

    pub fn triggered(&self, base: Spur, label: Spur, rule_code: i32) -> KindHandle {
        self.interner.intern(Kind::Triggered {
            base,
            label,
            rule_code,
        })
    }

    pub fn propagation(&self, root: Root) -> KindHandle {
        self.interner.intern(Kind::Propagation(root))
    }

    pub fn local_return(&self) -> KindHandle {
        self.interner.intern(Kind::LocalReturn)
    }

    pub fn local_argument(&self, position: ParameterPosition) -> KindHandle {
        self.interner.intern(Kind::LocalArgument(position))
    }

    pub fn receiver(&self) -> KindHandle {
        self.interner.intern(Kind::Receiver)
    }

    pub fn local_result(&self) -> KindHandle {
        self.interner.intern(Kind::LocalResult)
    }

    /// Wrap a kind in transform lists. Both lists absent collapses back
    /// to the base kind; a transform base is flattened first.
    pub fn transform_kind(
        &self,
        base: KindHandle,
        local_transforms: Option<TransformListHandle>,
        global_transforms: Option<TransformListHandle>,
    ) -> KindHandle {
        debug_assert!(!base.is_transform());
        if local_transforms.is_none() && global_transforms.is_none() {
            return base;
        }
        self.interner.intern(Kind::Transform {
            base,
            local_transforms,
            global_transforms,
        })
    }
}

impl Default for KindFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::transforms::{TransformList, TransformsFactory};

    #[test]
    fn named_kinds_are_hash_consed() {
        let strings = ThreadedRodeo::new();
        let factory = KindFactory::new();
        let a = factory.named(strings.get_or_intern("Secret"));
        let b = factory.named(strings.get_or_intern("Secret"));
        let c = factory.named(strings.get_or_intern("Public"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn propagation_roots() {
        let factory = KindFactory::new();
        assert_eq!(
            factory.local_return().propagation_root(),
            Some(Root::return_value())
        );
        assert_eq!(
            factory.local_argument(2).propagation_root(),
            Some(Root::argument(2))
        );
        assert_eq!(factory.receiver().propagation_root(), Some(Root::argument(0)));
        assert!(factory.local_return().is_propagation());
    }

    #[test]
    fn transform_kind_collapses_without_lists() {
        let strings = ThreadedRodeo::new();
        let kinds = KindFactory::new();
        let transforms = TransformsFactory::new();
        let base = kinds.named(strings.get_or_intern("Secret"));

        assert_eq!(kinds.transform_kind(base, None, None), base);

        let decode = transforms.named(strings.get_or_intern("decode"));
        let list = transforms.create(TransformList::new(vec![decode]));
        let wrapped = kinds.transform_kind(base, list, None);
        assert_ne!(wrapped, base);
        assert_eq!(wrapped.discard_transforms(), base);
    }
}
