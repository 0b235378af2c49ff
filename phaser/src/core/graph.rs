//! Phase graph arena: nodes, edges, placement, lookup and jump paths.
//!
//! Every node lives in one `Vec` and refers to others by [`NodeId`]. Schedules
//! and domains are a begin/end pair of nodes; the begin node is the handle
//! used everywhere else (as a `parent`, as an `add` target, as a domain).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::objection::Objection;
use crate::core::types::{ImpId, NodeId, PhaseBehavior, PhaseImp, PhaseKind, PhaseState};
use crate::diagnostics::Diagnostics;
use crate::error::PhaseError;

/// One vertex of the phase DAG.
#[derive(Debug, Clone)]
pub struct PhaseNode {
    pub(crate) name: String,
    pub(crate) kind: PhaseKind,
    pub(crate) imp: Option<ImpId>,
    /// Set on begin nodes of schedules and domains.
    pub(crate) end: Option<NodeId>,
    /// Set on end nodes; points back to the begin node.
    pub(crate) begin: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) predecessors: BTreeSet<NodeId>,
    pub(crate) successors: BTreeSet<NodeId>,
    pub(crate) syncs: BTreeSet<NodeId>,
    pub(crate) state: PhaseState,
    pub(crate) jump_target: Option<NodeId>,
    pub(crate) objection: Option<Objection>,
    pub(crate) run_count: u32,
}

impl PhaseNode {
    fn new(name: &str, kind: PhaseKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            imp: None,
            end: None,
            begin: None,
            parent: None,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            syncs: BTreeSet::new(),
            state: PhaseState::Dormant,
            jump_target: None,
            objection: None,
            run_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn imp(&self) -> Option<ImpId> {
        self.imp
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn predecessors(&self) -> &BTreeSet<NodeId> {
        &self.predecessors
    }

    pub fn successors(&self) -> &BTreeSet<NodeId> {
        &self.successors
    }

    pub fn syncs(&self) -> &BTreeSet<NodeId> {
        &self.syncs
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn jump_target(&self) -> Option<NodeId> {
        self.jump_target
    }

    pub fn objection(&self) -> Option<&Objection> {
        self.objection.as_ref()
    }

    /// Times the node reached `Done` by executing (skips do not count).
    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    /// True for the closing node of a schedule or domain.
    pub fn is_end(&self) -> bool {
        self.begin.is_some()
    }

    /// True when the node's objection would let a task phase end now.
    pub fn is_quiescent(&self) -> bool {
        self.objection.as_ref().is_none_or(Objection::is_quiescent)
    }

    /// Outstanding objection total on this node.
    pub fn objection_total(&self) -> u32 {
        self.objection.as_ref().map_or(0, Objection::total)
    }
}

/// Anchors for [`PhaseGraph::add_imp`] and [`PhaseGraph::add_schedule`].
///
/// No anchors means "append before the schedule's end node".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Placement {
    pub with: Option<NodeId>,
    pub after: Option<NodeId>,
    pub before: Option<NodeId>,
}

impl Placement {
    pub fn at_end() -> Self {
        Self::default()
    }

    pub fn with(anchor: NodeId) -> Self {
        Self {
            with: Some(anchor),
            ..Self::default()
        }
    }

    pub fn after(anchor: NodeId) -> Self {
        Self {
            after: Some(anchor),
            ..Self::default()
        }
    }

    pub fn before(anchor: NodeId) -> Self {
        Self {
            before: Some(anchor),
            ..Self::default()
        }
    }

    /// Adds a `before` anchor to an existing placement.
    pub fn and_before(self, anchor: NodeId) -> Self {
        Self {
            before: Some(anchor),
            ..self
        }
    }
}

/// Lookup key for [`PhaseGraph::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKey<'a> {
    Node(NodeId),
    Name(&'a str),
}

impl From<NodeId> for PhaseKey<'_> {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl<'a> From<&'a str> for PhaseKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpDirection {
    Backward,
    Forward,
}

/// Node sets touched by a jump from `from` to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpPlan {
    pub from: NodeId,
    pub target: NodeId,
    pub direction: JumpDirection,
    /// Nodes returned to `Dormant` (the target included).
    pub reset: BTreeSet<NodeId>,
    /// Nodes passed over by a forward jump; marked `Done` without executing.
    pub skipped: BTreeSet<NodeId>,
}

/// The phase DAG and its registry of imps and domains.
#[derive(Debug, Default)]
pub struct PhaseGraph {
    nodes: Vec<PhaseNode>,
    imps: Vec<PhaseImp>,
    pub(crate) domains: BTreeMap<String, NodeId>,
    pub(crate) common: Option<NodeId>,
    pub(crate) uvm: Option<NodeId>,
    pub(crate) diagnostics: Diagnostics,
}

impl PhaseGraph {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Panics on an id from another graph; ids are only minted by this arena.
    pub fn node(&self, id: NodeId) -> &PhaseNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PhaseNode {
        &mut self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&PhaseNode> {
        self.nodes.get(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn imp(&self, id: ImpId) -> &PhaseImp {
        &self.imps[id.0]
    }

    /// Imp behind an `Imp` node.
    pub fn imp_of(&self, id: NodeId) -> Option<&PhaseImp> {
        self.node(id).imp.map(|imp| self.imp(imp))
    }

    /// Registers (or returns the existing) imp named `name`.
    pub fn define_imp(&mut self, name: &str, behavior: PhaseBehavior) -> Result<ImpId, PhaseError> {
        if let Some(pos) = self.imps.iter().position(|imp| imp.name == name) {
            if self.imps[pos].behavior != behavior {
                return Err(PhaseError::ImpConflict(name.to_string()));
            }
            return Ok(ImpId(pos));
        }
        self.imps.push(PhaseImp {
            name: name.to_string(),
            behavior,
        });
        Ok(ImpId(self.imps.len() - 1))
    }

    pub fn imp_by_name(&self, name: &str) -> Option<ImpId> {
        self.imps.iter().position(|imp| imp.name == name).map(ImpId)
    }

    /// Creates a free-standing schedule (begin → end) and returns its begin node.
    pub fn new_schedule(&mut self, name: &str) -> NodeId {
        self.new_pair(name, PhaseKind::Schedule)
    }

    pub(crate) fn new_domain_node(&mut self, name: &str) -> NodeId {
        self.new_pair(name, PhaseKind::Domain)
    }

    fn new_pair(&mut self, name: &str, kind: PhaseKind) -> NodeId {
        let begin = self.push(PhaseNode::new(name, kind));
        let end = self.push(PhaseNode::new(&format!("{name}_end"), kind));
        self.node_mut(begin).end = Some(end);
        let end_node = self.node_mut(end);
        end_node.begin = Some(begin);
        end_node.parent = Some(begin);
        self.connect(begin, end);
        begin
    }

    fn push(&mut self, node: PhaseNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Inserts a new node executing `imp` into `schedule` and returns it.
    pub fn add_imp(
        &mut self,
        schedule: NodeId,
        imp: ImpId,
        placement: Placement,
    ) -> Result<NodeId, PhaseError> {
        let anchors = self.resolve_placement(schedule, placement)?;
        let name = self.imp(imp).name.clone();
        let mut node = PhaseNode::new(&name, PhaseKind::Imp);
        node.imp = Some(imp);
        node.parent = Some(schedule);
        let id = self.push(node);
        self.link(id, id, anchors);
        Ok(id)
    }

    /// Grafts a schedule or domain (by its begin node) into `schedule`.
    pub fn add_schedule(
        &mut self,
        schedule: NodeId,
        sub: NodeId,
        placement: Placement,
    ) -> Result<(), PhaseError> {
        let end = self
            .node(sub)
            .end
            .ok_or_else(|| PhaseError::NotASchedule(self.node(sub).name.clone()))?;
        let anchors = self.resolve_placement(schedule, placement)?;
        self.node_mut(sub).parent = Some(schedule);
        self.link(sub, end, anchors);
        Ok(())
    }

    fn resolve_placement(
        &self,
        schedule: NodeId,
        placement: Placement,
    ) -> Result<Placement, PhaseError> {
        let sched = self.get(schedule).ok_or(PhaseError::UnknownNode(schedule))?;
        let sched_end = match (sched.kind, sched.end) {
            (PhaseKind::Schedule | PhaseKind::Domain, Some(end)) => end,
            _ => return Err(PhaseError::NotASchedule(sched.name.clone())),
        };
        if placement.with.is_some() && (placement.after.is_some() || placement.before.is_some()) {
            return Err(PhaseError::ConflictingPlacement);
        }
        for anchor in [placement.with, placement.after, placement.before]
            .into_iter()
            .flatten()
        {
            if !self.contains(anchor) {
                return Err(PhaseError::UnknownNode(anchor));
            }
            if anchor == schedule || !self.in_scope(schedule, anchor) {
                return Err(PhaseError::AnchorNotInSchedule {
                    anchor: self.node(anchor).name.clone(),
                    schedule: sched.name.clone(),
                });
            }
        }

        let mut resolved = placement;
        // An `after` anchor that is itself a schedule means "after all of it".
        if let Some(after) = resolved.after {
            resolved.after = Some(self.node(after).end.unwrap_or(after));
        }
        if resolved == Placement::default() {
            resolved.before = Some(sched_end);
        }
        if let (Some(after), Some(before)) = (resolved.after, resolved.before) {
            if !self.is_before(after, before) {
                return Err(PhaseError::InvalidPlacement {
                    after: self.node(after).name.clone(),
                    before: self.node(before).name.clone(),
                });
            }
        }
        Ok(resolved)
    }

    fn link(&mut self, begin: NodeId, end: NodeId, anchors: Placement) {
        match anchors {
            Placement {
                after: Some(after),
                before: Some(before),
                ..
            } => {
                self.connect(after, begin);
                self.connect(end, before);
                self.disconnect(after, before);
            }
            Placement {
                before: Some(before),
                ..
            } => {
                let preds: Vec<NodeId> = self.node(before).predecessors.iter().copied().collect();
                for pred in preds {
                    self.disconnect(pred, before);
                    self.connect(pred, begin);
                }
                self.connect(end, before);
            }
            Placement {
                after: Some(after),
                ..
            } => {
                let succs: Vec<NodeId> = self.node(after).successors.iter().copied().collect();
                for succ in succs {
                    self.disconnect(after, succ);
                    self.connect(end, succ);
                }
                self.connect(after, begin);
            }
            Placement {
                with: Some(with), ..
            } => {
                let with_end = self.node(with).end.unwrap_or(with);
                let preds: Vec<NodeId> = self.node(with).predecessors.iter().copied().collect();
                let succs: Vec<NodeId> = self.node(with_end).successors.iter().copied().collect();
                for pred in preds {
                    self.connect(pred, begin);
                }
                for succ in succs {
                    self.connect(end, succ);
                }
            }
            Placement { .. } => {}
        }
    }

    pub(crate) fn connect(&mut self, from: NodeId, to: NodeId) {
        self.node_mut(from).successors.insert(to);
        self.node_mut(to).predecessors.insert(from);
    }

    pub(crate) fn disconnect(&mut self, from: NodeId, to: NodeId) {
        self.node_mut(from).successors.remove(&to);
        self.node_mut(to).predecessors.remove(&from);
    }

    /// True when `id` lies inside the schedule or domain begun by `scope`
    /// (its end node included).
    pub fn in_scope(&self, scope: NodeId, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == scope {
                return true;
            }
            cursor = self.node(current).parent;
        }
        false
    }

    /// Enclosing domain begin node. A domain's own nodes map to themselves.
    pub fn domain_of(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current);
            if node.kind == PhaseKind::Domain {
                return Some(node.begin.unwrap_or(current));
            }
            cursor = node.parent;
        }
        None
    }

    pub fn domain_name(&self, id: NodeId) -> String {
        self.domain_of(id)
            .map(|domain| self.node(domain).name.clone())
            .unwrap_or_default()
    }

    /// `domain.name` label used in logs and reports.
    pub fn label(&self, id: NodeId) -> String {
        let domain = self.domain_name(id);
        let name = &self.node(id).name;
        if domain.is_empty() || domain == *name {
            name.clone()
        } else {
            format!("{domain}.{name}")
        }
    }

    /// Breadth-first search from `scope`: the node itself, its predecessors,
    /// then its successors. With `stay_in_scope`, only nodes inside `scope`
    /// match.
    pub fn find<'a>(
        &self,
        scope: NodeId,
        key: impl Into<PhaseKey<'a>>,
        stay_in_scope: bool,
    ) -> Option<NodeId> {
        let key = key.into();
        let matches = |id: NodeId| {
            let hit = match key {
                PhaseKey::Node(target) => id == target,
                PhaseKey::Name(name) => self.node(id).name == name,
            };
            hit && (!stay_in_scope || self.in_scope(scope, id))
        };
        if matches(scope) {
            return Some(scope);
        }
        self.bfs(scope, |node| &node.predecessors)
            .into_iter()
            .find(|id| matches(*id))
            .or_else(|| {
                self.bfs(scope, |node| &node.successors)
                    .into_iter()
                    .find(|id| matches(*id))
            })
    }

    /// First node named `name` anywhere in the graph, in creation order.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.ids().find(|id| self.node(*id).name == name)
    }

    fn bfs(&self, start: NodeId, next: impl Fn(&PhaseNode) -> &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            for &adjacent in next(self.node(id)) {
                if seen.insert(adjacent) {
                    order.push(adjacent);
                    queue.push_back(adjacent);
                }
            }
        }
        order
    }

    /// Every node reachable from `id` through successor edges, `id` excluded.
    pub fn reachable_from(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.bfs(id, |node| &node.successors).into_iter().collect()
    }

    /// Every node that can reach `id`, `id` excluded.
    pub fn reaching(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.bfs(id, |node| &node.predecessors).into_iter().collect()
    }

    pub fn is_before(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.reachable_from(a).contains(&b)
    }

    pub fn is_after(&self, a: NodeId, b: NodeId) -> bool {
        self.is_before(b, a)
    }

    /// Imp nodes directly downstream of `id`, looking through schedule and
    /// domain boundary nodes.
    pub fn adjacent_successor_imps(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.adjacent_imps(self.node(id).successors.iter().copied(), |node| {
            &node.successors
        })
    }

    /// Imp predecessors of the imps that follow `id`, minus `id` itself.
    ///
    /// A task phase cannot finish while any of these is still running.
    pub fn siblings(&self, id: NodeId) -> BTreeSet<NodeId> {
        let successors = self.adjacent_successor_imps(id);
        let starts = successors
            .iter()
            .flat_map(|succ| self.node(*succ).predecessors.iter().copied())
            .collect::<Vec<_>>();
        let mut siblings = self.adjacent_imps(starts.into_iter(), |node| &node.predecessors);
        siblings.remove(&id);
        siblings
    }

    fn adjacent_imps(
        &self,
        starts: impl Iterator<Item = NodeId>,
        next: impl Fn(&PhaseNode) -> &BTreeSet<NodeId>,
    ) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = starts.collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let node = self.node(id);
            if node.kind == PhaseKind::Imp {
                found.insert(id);
            } else {
                stack.extend(next(node).iter().copied());
            }
        }
        found
    }

    /// Computes which nodes a jump from `from` to `target` resets or skips.
    pub fn jump_plan(&self, from: NodeId, target: NodeId) -> Result<JumpPlan, PhaseError> {
        if target == from {
            return Ok(JumpPlan {
                from,
                target,
                direction: JumpDirection::Backward,
                reset: BTreeSet::new(),
                skipped: BTreeSet::new(),
            });
        }
        if self.is_before(target, from) {
            let ahead = self.reachable_from(target);
            let mut reset: BTreeSet<NodeId> =
                self.reaching(from).intersection(&ahead).copied().collect();
            reset.insert(target);
            return Ok(JumpPlan {
                from,
                target,
                direction: JumpDirection::Backward,
                reset,
                skipped: BTreeSet::new(),
            });
        }
        if self.is_before(from, target) {
            let skipped = self
                .reachable_from(from)
                .intersection(&self.reaching(target))
                .copied()
                .collect();
            let mut reset = self.reachable_from(target);
            reset.insert(target);
            return Ok(JumpPlan {
                from,
                target,
                direction: JumpDirection::Forward,
                reset,
                skipped,
            });
        }
        Err(PhaseError::UnreachableJump {
            from: self.label(from),
            to: self.label(target),
        })
    }

    /// Pairs two nodes for start and end synchronization.
    pub fn sync_nodes(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        self.node_mut(a).syncs.insert(b);
        self.node_mut(b).syncs.insert(a);
    }

    pub fn unsync_nodes(&mut self, a: NodeId, b: NodeId) {
        self.node_mut(a).syncs.remove(&b);
        self.node_mut(b).syncs.remove(&a);
    }

    /// Kahn ordering of every node; `None` when the edges contain a cycle.
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.predecessors.len()).collect();
        let mut ready: VecDeque<NodeId> = self.ids().filter(|id| indegree[id.0] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for succ in &self.node(id).successors {
                indegree[succ.0] -= 1;
                if indegree[succ.0] == 0 {
                    ready.push_back(*succ);
                }
            }
        }
        (order.len() == self.nodes.len()).then_some(order)
    }

    /// Returns every node to `Dormant` with no objection, jump or run count.
    pub(crate) fn reset_for_run(&mut self) {
        for node in &mut self.nodes {
            node.state = PhaseState::Dormant;
            node.jump_target = None;
            node.objection = None;
            node.run_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FunctionOrder;

    fn graph_with(names: &[&str]) -> (PhaseGraph, NodeId, Vec<NodeId>) {
        let mut graph = PhaseGraph::default();
        let sched = graph.new_schedule("sched");
        let mut ids = Vec::new();
        for name in names {
            let imp = graph.define_imp(name, PhaseBehavior::Task).expect("imp");
            ids.push(graph.add_imp(sched, imp, Placement::at_end()).expect("add"));
        }
        (graph, sched, ids)
    }

    fn names(graph: &PhaseGraph, ids: &BTreeSet<NodeId>) -> Vec<String> {
        ids.iter().map(|id| graph.node(*id).name().to_string()).collect()
    }

    /// Appending without anchors chains nodes before the schedule end.
    #[test]
    fn default_placement_chains_in_order() {
        let (graph, sched, ids) = graph_with(&["a", "b", "c"]);
        let end = graph.node(sched).end.expect("end");
        assert_eq!(graph.node(sched).successors(), &BTreeSet::from([ids[0]]));
        assert_eq!(graph.node(ids[0]).successors(), &BTreeSet::from([ids[1]]));
        assert_eq!(graph.node(ids[2]).successors(), &BTreeSet::from([end]));
        assert!(graph.is_before(ids[0], ids[2]));
        assert!(graph.is_after(ids[2], ids[0]));
        assert!(!graph.is_before(ids[1], ids[1]));
    }

    #[test]
    fn with_placement_runs_in_parallel() {
        let (mut graph, sched, ids) = graph_with(&["a", "b", "c"]);
        let imp = graph.define_imp("p", PhaseBehavior::Task).expect("imp");
        let p = graph.add_imp(sched, imp, Placement::with(ids[1])).expect("add");
        assert_eq!(graph.node(p).predecessors(), &BTreeSet::from([ids[0]]));
        assert_eq!(graph.node(p).successors(), &BTreeSet::from([ids[2]]));
        assert!(!graph.is_before(p, ids[1]));
        assert!(!graph.is_before(ids[1], p));
        assert_eq!(names(&graph, &graph.siblings(ids[1])), vec!["p"]);
    }

    #[test]
    fn after_and_before_replace_direct_edge() {
        let (mut graph, sched, ids) = graph_with(&["a", "b"]);
        let imp = graph.define_imp("mid", PhaseBehavior::Task).expect("imp");
        let mid = graph
            .add_imp(sched, imp, Placement::after(ids[0]).and_before(ids[1]))
            .expect("add");
        assert!(!graph.node(ids[0]).successors().contains(&ids[1]));
        assert!(graph.is_before(ids[0], mid));
        assert!(graph.is_before(mid, ids[1]));
    }

    #[test]
    fn after_only_takes_over_successors() {
        let (mut graph, sched, ids) = graph_with(&["a", "b"]);
        let imp = graph.define_imp("x", PhaseBehavior::Task).expect("imp");
        let x = graph.add_imp(sched, imp, Placement::after(ids[0])).expect("add");
        assert_eq!(graph.node(ids[0]).successors(), &BTreeSet::from([x]));
        assert_eq!(graph.node(x).successors(), &BTreeSet::from([ids[1]]));
    }

    #[test]
    fn placement_errors_are_reported() {
        let (mut graph, sched, ids) = graph_with(&["a", "b"]);
        let other = graph.new_schedule("other");
        let imp = graph.define_imp("z", PhaseBehavior::Task).expect("imp");
        let outside = graph.add_imp(other, imp, Placement::at_end()).expect("add");

        let conflict = graph.add_imp(sched, imp, Placement::with(ids[0]).and_before(ids[1]));
        assert_eq!(conflict, Err(PhaseError::ConflictingPlacement));

        let foreign = graph.add_imp(sched, imp, Placement::after(outside));
        assert!(matches!(foreign, Err(PhaseError::AnchorNotInSchedule { .. })));

        let backwards = graph.add_imp(sched, imp, Placement::after(ids[1]).and_before(ids[0]));
        assert!(matches!(backwards, Err(PhaseError::InvalidPlacement { .. })));

        let not_sched = graph.add_imp(ids[0], imp, Placement::at_end());
        assert!(matches!(not_sched, Err(PhaseError::NotASchedule(_))));
    }

    #[test]
    fn imp_redefinition_must_match() {
        let mut graph = PhaseGraph::default();
        let first = graph
            .define_imp("build", PhaseBehavior::Function(FunctionOrder::TopDown))
            .expect("define");
        let again = graph
            .define_imp("build", PhaseBehavior::Function(FunctionOrder::TopDown))
            .expect("define");
        assert_eq!(first, again);
        assert_eq!(
            graph.define_imp("build", PhaseBehavior::Task),
            Err(PhaseError::ImpConflict("build".to_string()))
        );
    }

    #[test]
    fn find_searches_predecessors_first_and_respects_scope() {
        let (mut graph, sched, ids) = graph_with(&["a", "b", "c"]);
        assert_eq!(graph.find(ids[2], "a", false), Some(ids[0]));
        assert_eq!(graph.find(ids[0], "c", false), Some(ids[2]));
        assert_eq!(graph.find(ids[1], ids[1], false), Some(ids[1]));

        let outer = graph.new_schedule("outer");
        graph.add_schedule(outer, sched, Placement::at_end()).expect("graft");
        let imp = graph.define_imp("tail", PhaseBehavior::Task).expect("imp");
        let tail = graph.add_imp(outer, imp, Placement::at_end()).expect("add");
        assert_eq!(graph.find(sched, "tail", false), Some(tail));
        assert_eq!(graph.find(sched, "tail", true), None);
        assert_eq!(graph.find(outer, "b", true), Some(ids[1]));
    }

    #[test]
    fn backward_jump_resets_the_path_only() {
        let (graph, _, ids) = graph_with(&["a", "b", "c", "d", "e"]);
        let plan = graph.jump_plan(ids[3], ids[1]).expect("plan");
        assert_eq!(plan.direction, JumpDirection::Backward);
        assert_eq!(names(&graph, &plan.reset), vec!["b", "c"]);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn forward_jump_skips_intermediates() {
        let (graph, sched, ids) = graph_with(&["a", "b", "c", "d"]);
        let plan = graph.jump_plan(ids[0], ids[2]).expect("plan");
        assert_eq!(plan.direction, JumpDirection::Forward);
        assert_eq!(names(&graph, &plan.skipped), vec!["b"]);
        let end = graph.node(sched).end.expect("end");
        assert_eq!(plan.reset, BTreeSet::from([ids[2], ids[3], end]));
    }

    #[test]
    fn jump_between_parallel_nodes_is_unreachable() {
        let (mut graph, sched, ids) = graph_with(&["a", "b", "c"]);
        let imp = graph.define_imp("p", PhaseBehavior::Task).expect("imp");
        let p = graph.add_imp(sched, imp, Placement::with(ids[1])).expect("add");
        assert!(matches!(
            graph.jump_plan(ids[1], p),
            Err(PhaseError::UnreachableJump { .. })
        ));
    }

    #[test]
    fn siblings_look_through_schedule_boundaries() {
        let mut graph = PhaseGraph::default();
        let outer = graph.new_schedule("outer");
        let run_imp = graph.define_imp("run", PhaseBehavior::Task).expect("imp");
        let next_imp = graph.define_imp("next", PhaseBehavior::Task).expect("imp");
        let run = graph.add_imp(outer, run_imp, Placement::at_end()).expect("add");
        let next = graph.add_imp(outer, next_imp, Placement::at_end()).expect("add");

        let inner = graph.new_schedule("inner");
        let last_imp = graph.define_imp("last", PhaseBehavior::Task).expect("imp");
        let last = graph.add_imp(inner, last_imp, Placement::at_end()).expect("add");
        graph.add_schedule(outer, inner, Placement::with(run)).expect("graft");

        assert_eq!(graph.adjacent_successor_imps(last), BTreeSet::from([next]));
        assert_eq!(graph.siblings(run), BTreeSet::from([last]));
        assert_eq!(graph.siblings(last), BTreeSet::from([run]));
        assert!(graph.topological_order().is_some());
    }
}
