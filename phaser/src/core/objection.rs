//! Objection accounting for a single phase node.
//!
//! Pure bookkeeping only: the drain timer and callbacks live in
//! `runtime::objection`, which drives this state machine.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::core::types::ComponentId;
use crate::tree::ComponentTree;

/// Outcome of [`Objection::drop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropOutcome {
    /// Count actually removed (after clamping).
    pub dropped: u32,
    /// Requested count that had no matching raise.
    pub excess: u32,
    /// True when this drop took the node total from nonzero to zero.
    pub reached_zero: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Objection {
    counts: BTreeMap<ComponentId, u32>,
    total: u32,
    drain_times: BTreeMap<ComponentId, Duration>,
    raisers: BTreeSet<ComponentId>,
    all_dropped: bool,
}

impl Objection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, object: ComponentId, count: u32) {
        *self.counts.entry(object).or_default() += count;
        self.total += count;
        self.raisers.insert(object);
        self.all_dropped = false;
    }

    /// Removes up to `count` from `object`, never below zero.
    pub fn drop(&mut self, object: ComponentId, count: u32) -> DropOutcome {
        let held = self.counts.get(&object).copied().unwrap_or(0);
        let dropped = held.min(count);
        if dropped == held {
            self.counts.remove(&object);
        } else {
            self.counts.insert(object, held - dropped);
        }
        self.total -= dropped;
        DropOutcome {
            dropped,
            excess: count - dropped,
            reached_zero: dropped > 0 && self.total == 0,
        }
    }

    /// Node-wide outstanding count.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Count raised by `object` itself.
    pub fn count(&self, object: ComponentId) -> u32 {
        self.counts.get(&object).copied().unwrap_or(0)
    }

    /// Total as seen from `object`.
    ///
    /// The root always sees everything. Other objects see their subtree when
    /// `propagate` is set and only their own count otherwise.
    pub fn total_for(&self, object: ComponentId, tree: &ComponentTree, propagate: bool) -> u32 {
        if object == tree.root() {
            return self.total;
        }
        if !propagate {
            return self.count(object);
        }
        self.counts
            .iter()
            .filter(|(holder, _)| tree.is_ancestor_or_self(object, **holder))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Objects holding a nonzero count, in id order.
    pub fn objectors(&self) -> Vec<ComponentId> {
        self.counts.keys().copied().collect()
    }

    /// Every object that raised since the objection was created.
    pub fn raisers(&self) -> &BTreeSet<ComponentId> {
        &self.raisers
    }

    pub fn ever_raised(&self) -> bool {
        !self.raisers.is_empty()
    }

    pub fn set_drain_time(&mut self, object: ComponentId, drain: Duration) {
        self.drain_times.insert(object, drain);
    }

    pub fn drain_time(&self, object: ComponentId, default: Duration) -> Duration {
        self.drain_times.get(&object).copied().unwrap_or(default)
    }

    pub fn mark_all_dropped(&mut self) {
        self.all_dropped = true;
    }

    pub fn all_dropped(&self) -> bool {
        self.all_dropped
    }

    /// Never raised, or drained back to zero and notified.
    pub fn is_quiescent(&self) -> bool {
        !self.ever_raised() || (self.total == 0 && self.all_dropped)
    }

    /// Forgets every outstanding count; returns how many were cleared.
    pub fn clear(&mut self) -> u32 {
        let outstanding = self.total;
        self.counts.clear();
        self.total = 0;
        outstanding
    }

    /// Indented `count total name` table of the component tree.
    pub fn render(&self, tree: &ComponentTree, propagate: bool) -> String {
        let mut out = String::from("count  total  object\n");
        for id in tree.top_down() {
            let depth = tree.ancestors(id).len();
            out.push_str(&format!(
                "{:>5}  {:>5}  {}{}\n",
                self.count(id),
                self.total_for(id, tree, propagate),
                "  ".repeat(depth),
                tree.name(id)
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::three_level_tree;

    #[test]
    fn raise_then_drop_restores_total() {
        let mut objection = Objection::new();
        let a = ComponentId(1);
        objection.raise(a, 3);
        assert_eq!(objection.total(), 3);
        let outcome = objection.drop(a, 3);
        assert_eq!(outcome.dropped, 3);
        assert!(outcome.reached_zero);
        assert_eq!(objection.total(), 0);
        assert!(objection.objectors().is_empty());
        assert!(!objection.is_quiescent());
        objection.mark_all_dropped();
        assert!(objection.is_quiescent());
    }

    /// Dropping more than was raised clamps at zero and reports the excess.
    #[test]
    fn drop_underflow_clamps() {
        let mut objection = Objection::new();
        let a = ComponentId(1);
        let b = ComponentId(2);
        objection.raise(a, 1);
        let outcome = objection.drop(b, 2);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.excess, 2);
        assert!(!outcome.reached_zero);
        assert_eq!(objection.total(), 1);

        let outcome = objection.drop(a, 4);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.excess, 3);
        assert!(outcome.reached_zero);
    }

    #[test]
    fn raise_clears_all_dropped() {
        let mut objection = Objection::new();
        let a = ComponentId(0);
        objection.raise(a, 1);
        objection.drop(a, 1);
        objection.mark_all_dropped();
        objection.raise(a, 1);
        assert!(!objection.all_dropped());
        assert!(!objection.is_quiescent());
    }

    #[test]
    fn hierarchical_totals_follow_propagation() {
        let (tree, ids) = three_level_tree();
        let mut objection = Objection::new();
        objection.raise(ids.driver, 2);
        objection.raise(ids.scoreboard, 1);

        assert_eq!(objection.total_for(tree.root(), &tree, false), 3);
        assert_eq!(objection.total_for(ids.env, &tree, true), 3);
        assert_eq!(objection.total_for(ids.agent, &tree, true), 2);
        assert_eq!(objection.total_for(ids.env, &tree, false), 0);
        assert_eq!(objection.total_for(ids.driver, &tree, false), 2);
    }

    #[test]
    fn drain_time_falls_back_to_default() {
        let mut objection = Objection::new();
        let a = ComponentId(3);
        objection.set_drain_time(a, Duration::from_secs(2));
        assert_eq!(objection.drain_time(a, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(
            objection.drain_time(ComponentId(4), Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn render_lists_every_component() {
        let (tree, ids) = three_level_tree();
        let mut objection = Objection::new();
        objection.raise(ids.monitor, 1);
        let text = objection.render(&tree, true);
        assert!(text.contains("monitor"));
        assert_eq!(text.lines().count(), tree.len() + 1);
        assert!(objection.clear() == 1 && objection.total() == 0);
    }
}
