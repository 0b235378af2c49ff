//! Component tree arena.
//!
//! The scheduler only needs names, hierarchy, domain binding and the
//! behaviour object of each component. Children are kept sorted by name,
//! which fixes the iteration order used by every traversal.

use std::cell::RefCell;
use std::rc::Rc;

use crate::component::{Component, Inert};
use crate::core::types::{ComponentId, NodeId};
use crate::error::PhaseError;

pub struct ComponentNode {
    name: String,
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    domain: Option<NodeId>,
    built: bool,
    current_phase: Option<NodeId>,
    behavior: Rc<RefCell<dyn Component>>,
}

impl ComponentNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    /// Bound domain; `None` means the default `uvm` domain.
    pub fn domain(&self) -> Option<NodeId> {
        self.domain
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn current_phase(&self) -> Option<NodeId> {
        self.current_phase
    }
}

pub struct ComponentTree {
    nodes: Vec<ComponentNode>,
}

impl Default for ComponentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentTree {
    /// Tree with an inert root named `top`.
    pub fn new() -> Self {
        Self::with_root("top", Inert)
    }

    pub fn with_root(name: &str, component: impl Component + 'static) -> Self {
        Self {
            nodes: vec![ComponentNode {
                name: name.to_string(),
                parent: None,
                children: Vec::new(),
                domain: None,
                built: false,
                current_phase: None,
                behavior: Rc::new(RefCell::new(component)),
            }],
        }
    }

    pub fn root(&self) -> ComponentId {
        ComponentId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentNode> {
        self.nodes.get(id.0)
    }

    pub fn add_child(
        &mut self,
        parent: ComponentId,
        name: &str,
        component: impl Component + 'static,
    ) -> Result<ComponentId, PhaseError> {
        self.add_shared(parent, name, Rc::new(RefCell::new(component)))
    }

    /// Like [`add_child`](Self::add_child) for a behaviour the caller keeps a
    /// handle to.
    pub fn add_shared(
        &mut self,
        parent: ComponentId,
        name: &str,
        behavior: Rc<RefCell<dyn Component>>,
    ) -> Result<ComponentId, PhaseError> {
        let parent_node = self
            .nodes
            .get(parent.0)
            .ok_or(PhaseError::UnknownComponent(parent))?;
        if parent_node
            .children
            .iter()
            .any(|child| self.nodes[child.0].name == name)
        {
            return Err(PhaseError::DuplicateComponent {
                parent: self.full_name(parent),
                name: name.to_string(),
            });
        }
        let id = ComponentId(self.nodes.len());
        self.nodes.push(ComponentNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            domain: None,
            built: false,
            current_phase: None,
            behavior,
        });
        self.nodes[parent.0].children.push(id);
        self.sort_children(parent);
        Ok(id)
    }

    fn sort_children(&mut self, parent: ComponentId) {
        let mut children = std::mem::take(&mut self.nodes[parent.0].children);
        children.sort_by(|a, b| self.nodes[a.0].name.cmp(&self.nodes[b.0].name));
        self.nodes[parent.0].children = children;
    }

    /// Panics on an id from another tree; ids are only minted by this arena.
    pub fn name(&self, id: ComponentId) -> &str {
        &self.nodes[id.0].name
    }

    /// Dotted path from the root, e.g. `top.env.agent`.
    pub fn full_name(&self, id: ComponentId) -> String {
        let mut parts: Vec<&str> = self
            .ancestors(id)
            .iter()
            .rev()
            .map(|a| self.name(*a))
            .collect();
        parts.push(self.name(id));
        parts.join(".")
    }

    /// Resolves a dotted path produced by [`full_name`](Self::full_name).
    pub fn lookup(&self, path: &str) -> Option<ComponentId> {
        let mut segments = path.split('.');
        let root = self.root();
        if segments.next()? != self.name(root) {
            return None;
        }
        segments.try_fold(root, |current, segment| {
            self.nodes[current.0]
                .children
                .iter()
                .copied()
                .find(|child| self.name(*child) == segment)
        })
    }

    pub fn parent(&self, id: ComponentId) -> Option<ComponentId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        &self.nodes[id.0].children
    }

    /// Parent first, root last.
    pub fn ancestors(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut cursor = self.parent(id);
        while let Some(current) = cursor {
            out.push(current);
            cursor = self.parent(current);
        }
        out
    }

    pub fn is_ancestor_or_self(&self, ancestor: ComponentId, id: ComponentId) -> bool {
        id == ancestor || self.ancestors(id).contains(&ancestor)
    }

    /// Binds `id` (and, with `hierarchical`, its whole subtree) to `domain`.
    pub fn set_domain(
        &mut self,
        id: ComponentId,
        domain: NodeId,
        hierarchical: bool,
    ) -> Result<(), PhaseError> {
        if !self.contains(id) {
            return Err(PhaseError::UnknownComponent(id));
        }
        let targets = if hierarchical {
            self.subtree_pre_order(id)
        } else {
            vec![id]
        };
        for target in targets {
            self.nodes[target.0].domain = Some(domain);
        }
        Ok(())
    }

    pub fn domain(&self, id: ComponentId) -> Option<NodeId> {
        self.nodes[id.0].domain
    }

    pub fn is_built(&self, id: ComponentId) -> bool {
        self.nodes[id.0].built
    }

    pub(crate) fn mark_built(&mut self, id: ComponentId) {
        self.nodes[id.0].built = true;
    }

    pub fn current_phase(&self, id: ComponentId) -> Option<NodeId> {
        self.nodes[id.0].current_phase
    }

    pub(crate) fn set_current_phase(&mut self, id: ComponentId, phase: NodeId) {
        self.nodes[id.0].current_phase = Some(phase);
    }

    pub(crate) fn behavior(&self, id: ComponentId) -> Option<Rc<RefCell<dyn Component>>> {
        self.nodes.get(id.0).map(|node| Rc::clone(&node.behavior))
    }

    /// Pre-order: every parent before its descendants.
    pub fn top_down(&self) -> Vec<ComponentId> {
        self.subtree_pre_order(self.root())
    }

    /// Post-order: every parent after all of its descendants.
    pub fn bottom_up(&self) -> Vec<ComponentId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.post_order(self.root(), &mut out);
        out
    }

    fn subtree_pre_order(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    fn post_order(&self, id: ComponentId, out: &mut Vec<ComponentId>) {
        for child in self.children(id) {
            self.post_order(*child, out);
        }
        out.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::three_level_tree;

    fn names(tree: &ComponentTree, ids: &[ComponentId]) -> Vec<String> {
        ids.iter().map(|id| tree.name(*id).to_string()).collect()
    }

    #[test]
    fn children_iterate_by_name() {
        let mut tree = ComponentTree::new();
        let root = tree.root();
        tree.add_child(root, "zeta", Inert).expect("add");
        tree.add_child(root, "alpha", Inert).expect("add");
        assert_eq!(names(&tree, tree.children(root)), vec!["alpha", "zeta"]);
    }

    #[test]
    fn duplicate_child_name_is_rejected() {
        let mut tree = ComponentTree::new();
        let root = tree.root();
        tree.add_child(root, "env", Inert).expect("add");
        let err = tree.add_child(root, "env", Inert).expect_err("duplicate");
        assert!(matches!(err, PhaseError::DuplicateComponent { .. }));
        let err = tree
            .add_child(ComponentId(42), "x", Inert)
            .expect_err("unknown parent");
        assert_eq!(err, PhaseError::UnknownComponent(ComponentId(42)));
    }

    #[test]
    fn orders_match_hierarchy() {
        let (tree, _) = three_level_tree();
        assert_eq!(
            names(&tree, &tree.top_down()),
            vec!["top", "env", "agent", "driver", "monitor", "scoreboard"]
        );
        assert_eq!(
            names(&tree, &tree.bottom_up()),
            vec!["driver", "monitor", "agent", "scoreboard", "env", "top"]
        );
    }

    #[test]
    fn full_name_and_lookup_agree() {
        let (tree, ids) = three_level_tree();
        assert_eq!(tree.full_name(ids.driver), "top.env.agent.driver");
        assert_eq!(tree.lookup("top.env.agent.driver"), Some(ids.driver));
        assert_eq!(tree.lookup("top.env.missing"), None);
        assert_eq!(tree.lookup("other"), None);
        assert!(tree.is_ancestor_or_self(ids.env, ids.monitor));
        assert!(!tree.is_ancestor_or_self(ids.agent, ids.scoreboard));
    }

    #[test]
    fn hierarchical_domain_binding_covers_subtree() {
        let (mut tree, ids) = three_level_tree();
        tree.set_domain(ids.agent, NodeId(7), true).expect("bind");
        assert_eq!(tree.domain(ids.driver), Some(NodeId(7)));
        assert_eq!(tree.domain(ids.env), None);
        tree.set_domain(ids.scoreboard, NodeId(9), false).expect("bind");
        assert_eq!(tree.domain(ids.scoreboard), Some(NodeId(9)));
    }
}
