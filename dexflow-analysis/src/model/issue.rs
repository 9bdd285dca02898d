//! Issues: a source taint meeting a sink taint under a rule.

use rustc_hash::FxHashMap;

use crate::domains::{AbstractDomain, Taint};
use crate::ir::PositionHandle;

/// A discovered source-to-sink flow.
#[derive(Debug, Clone)]
pub struct Issue {
    pub sources: Taint,
    pub sinks: Taint,
    pub rule_code: i32,
    /// The callee whose sink the flow reaches, by signature.
    pub callee: String,
    /// Deterministic index of the sink port within the callee.
    pub sink_index: u32,
    pub position: Option<PositionHandle>,
}

/// The deduplication key of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub rule_code: i32,
    pub callee: String,
    pub sink_index: u32,
    pub position: Option<PositionHandle>,
}

impl Issue {
    pub fn key(&self) -> IssueKey {
        IssueKey {
            rule_code: self.rule_code,
            callee: self.callee.clone(),
            sink_index: self.sink_index,
            position: self.position,
        }
    }

    fn join_with(&mut self, other: Issue) {
        debug_assert_eq!(self.key(), other.key());
        self.sources.join_with(other.sources);
        self.sinks.join_with(other.sinks);
    }

    fn leq(&self, other: &Issue) -> bool {
        self.sources.leq(&other.sources) && self.sinks.leq(&other.sinks)
    }
}

/// A set of issues grouped by their deduplication key.
///
/// Positions may gain line augmentation after the analysis; rebuilding
/// requires constructing a fresh set so keys re-hash, never mutating
/// entries in place.
#[derive(Debug, Clone, Default)]
pub struct IssueSet {
    issues: FxHashMap<IssueKey, Issue>,
}

impl IssueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: Issue) {
        match self.issues.entry(issue.key()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().join_with(issue);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(issue);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues in deterministic order.
    pub fn iter_sorted(&self) -> Vec<&Issue> {
        let mut issues: Vec<&Issue> = self.issues.values().collect();
        issues.sort_by_key(|issue| {
            (
                issue.rule_code,
                issue.callee.clone(),
                issue.sink_index,
                issue.position.map(|position| {
                    (position.path().to_string(), position.line())
                }),
            )
        });
        issues
    }

    pub fn join_with(&mut self, other: IssueSet) {
        for (_, issue) in other.issues {
            self.add(issue);
        }
    }

    pub fn leq(&self, other: &IssueSet) -> bool {
        self.issues.iter().all(|(key, issue)| {
            other
                .issues
                .get(key)
                .map_or(false, |other_issue| issue.leq(other_issue))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessPath, Root};
    use crate::context::AnalysisContext;
    use crate::domains::{CallInfo, Frame};

    fn issue(context: &AnalysisContext, rule_code: i32, sink_index: u32) -> Issue {
        let kind = context.kinds.named(context.str("Secret"));
        let port = context.access_paths.get(AccessPath::from_root(Root::leaf()));
        let taint = Taint::from_frame(CallInfo::declaration(port), Frame::leaf(kind));
        Issue {
            sources: taint.clone(),
            sinks: taint,
            rule_code,
            callee: "LSink;.sink:(LData;)V".to_string(),
            sink_index,
            position: None,
        }
    }

    #[test]
    fn issues_deduplicate_by_key() {
        let context = AnalysisContext::for_test();
        let mut set = IssueSet::new();
        set.add(issue(&context, 1, 0));
        set.add(issue(&context, 1, 0));
        set.add(issue(&context, 2, 0));
        set.add(issue(&context, 1, 1));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn joining_same_key_merges_taint() {
        let context = AnalysisContext::for_test();
        let mut set = IssueSet::new();
        set.add(issue(&context, 1, 0));

        let mut other = issue(&context, 1, 0);
        let other_kind = context.kinds.named(context.str("Other"));
        let port = context.access_paths.get(AccessPath::from_root(Root::leaf()));
        other
            .sources
            .add_frame(CallInfo::declaration(port), Frame::leaf(other_kind));
        set.add(other);

        assert_eq!(set.len(), 1);
        let merged = set.iter_sorted()[0];
        assert_eq!(merged.sources.kinds().len(), 2);
    }
}
