//! The abstract-domain contract every lattice in the analysis satisfies.

/// A join-semilattice with bottom.
///
/// Laws: `x.leq(y) ⇔ x.join(y) == y`; join is commutative, associative
/// and absorbs bottom; widening is a join that guarantees finite
/// ascending chains; meet is the dual where meaningful.
pub trait AbstractDomain: Clone {
    fn bottom() -> Self;

    fn is_bottom(&self) -> bool;

    fn leq(&self, other: &Self) -> bool;

    fn join_with(&mut self, other: Self);

    /// Widening defaults to join; domains with unbounded height override
    /// this to collapse.
    fn widen_with(&mut self, other: Self) {
        self.join_with(other);
    }

    fn meet_with(&mut self, other: Self);

    /// Narrowing defaults to meet.
    fn narrow_with(&mut self, other: Self) {
        self.meet_with(other);
    }

    fn set_to_bottom(&mut self) {
        *self = Self::bottom();
    }

    fn join(mut self, other: Self) -> Self {
        self.join_with(other);
        self
    }

    fn equals(&self, other: &Self) -> bool {
        self.leq(other) && other.leq(self)
    }
}

/// Whether a tree write replaces the subtree or joins into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Replace the subtree at the path.
    Strong,
    /// Join into the subtree at the path.
    Weak,
}

/// The flat constant lattice: bottom, a single value, or top.
///
/// Joining two distinct values widens to top; used for inferred
/// getter/setter access paths and the last-position/last-parameter
/// slots of the environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConstantDomain<T> {
    #[default]
    Bottom,
    Value(T),
    Top,
}

impl<T: Clone + Eq> ConstantDomain<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            ConstantDomain::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, ConstantDomain::Top)
    }

    pub fn set_to_top(&mut self) {
        *self = ConstantDomain::Top;
    }
}

impl<T: Clone + Eq> AbstractDomain for ConstantDomain<T> {
    fn bottom() -> Self {
        ConstantDomain::Bottom
    }

    fn is_bottom(&self) -> bool {
        matches!(self, ConstantDomain::Bottom)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstantDomain::Bottom, _) => true,
            (_, ConstantDomain::Top) => true,
            (ConstantDomain::Value(a), ConstantDomain::Value(b)) => a == b,
            _ => false,
        }
    }

    fn join_with(&mut self, other: Self) {
        match (&*self, &other) {
            (ConstantDomain::Bottom, _) => *self = other,
            (_, ConstantDomain::Bottom) => {}
            (ConstantDomain::Top, _) | (_, ConstantDomain::Top) => {
                *self = ConstantDomain::Top;
            }
            (ConstantDomain::Value(a), ConstantDomain::Value(b)) => {
                if a != b {
                    *self = ConstantDomain::Top;
                }
            }
        }
    }

    fn meet_with(&mut self, other: Self) {
        match (&*self, &other) {
            (ConstantDomain::Top, _) => *self = other,
            (_, ConstantDomain::Top) => {}
            (ConstantDomain::Bottom, _) | (_, ConstantDomain::Bottom) => {
                *self = ConstantDomain::Bottom;
            }
            (ConstantDomain::Value(a), ConstantDomain::Value(b)) => {
                if a != b {
                    *self = ConstantDomain::Bottom;
                }
            }
        }
    }
}
