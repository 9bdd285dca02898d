//! DFS pre/post numbering of the class hierarchy.

use rustc_hash::FxHashMap;

use super::types::TypeIndex;
use crate::domains::ClassInterval;

/// Class name → interval. Unknown classes get the top interval.
#[derive(Debug, Default)]
pub struct ClassIntervals {
    intervals: FxHashMap<String, ClassInterval>,
}

impl ClassIntervals {
    /// Number the hierarchy: each class gets `[enter, exit]` from a DFS,
    /// so a subclass's interval is strictly inside its parents'.
    pub fn build(types: &TypeIndex) -> Self {
        let mut intervals = FxHashMap::default();
        let mut counter: u32 = 0;

        for root in types.roots() {
            Self::number(types, root, &mut counter, &mut intervals);
        }

        ClassIntervals { intervals }
    }

    fn number(
        types: &TypeIndex,
        class: &str,
        counter: &mut u32,
        intervals: &mut FxHashMap<String, ClassInterval>,
    ) {
        if intervals.contains_key(class) {
            return;
        }
        *counter += 1;
        let enter = *counter;
        // Reserve the slot to cut hierarchy cycles short.
        intervals.insert(class.to_string(), ClassInterval::new(enter, enter));

        let mut children: Vec<&str> = types
            .children_of(class)
            .iter()
            .map(String::as_str)
            .collect();
        children.sort_unstable();
        for child in children {
            Self::number(types, child, counter, intervals);
        }

        *counter += 1;
        intervals.insert(class.to_string(), ClassInterval::new(enter, *counter));
    }

    pub fn get(&self, class: &str) -> ClassInterval {
        self.intervals
            .get(class)
            .copied()
            .unwrap_or_else(ClassInterval::top)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ClassInterval)> {
        self.intervals
            .iter()
            .map(|(name, &interval)| (name.as_str(), interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ClassInfo;

    fn class(name: &str, superclass: Option<&str>) -> ClassInfo {
        ClassInfo {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            interfaces: Vec::new(),
        }
    }

    #[test]
    fn subclass_intervals_are_strictly_contained() {
        let mut types = TypeIndex::new();
        types.add_class(class("LBase;", None));
        types.add_class(class("LA;", Some("LBase;")));
        types.add_class(class("LB;", Some("LBase;")));
        types.add_class(class("LAA;", Some("LA;")));

        let intervals = ClassIntervals::build(&types);
        let base = intervals.get("LBase;");
        let a = intervals.get("LA;");
        let b = intervals.get("LB;");
        let aa = intervals.get("LAA;");

        assert!(base.contains(a));
        assert!(base.contains(b));
        assert!(a.contains(aa));
        assert!(!a.contains(b));
        assert!(!b.contains(a));
        assert!(a.meet(b).is_bottom());
    }

    #[test]
    fn unknown_class_is_top() {
        let intervals = ClassIntervals::build(&TypeIndex::new());
        assert!(intervals.get("LMissing;").is_top());
    }
}
