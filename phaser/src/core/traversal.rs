//! Which components a phase node visits, and in what order.

use crate::core::domain::BUILD_PHASE;
use crate::core::graph::PhaseGraph;
use crate::core::types::{ComponentId, FunctionOrder, NodeId, PhaseBehavior};
use crate::tree::ComponentTree;

/// True when `component` takes part in phases of `node`'s domain.
///
/// Common-domain phases visit every component; other phases visit only the
/// components bound to their domain (unbound components belong to `uvm`).
pub fn participates(
    graph: &PhaseGraph,
    tree: &ComponentTree,
    node: NodeId,
    component: ComponentId,
) -> bool {
    let Some(phase_domain) = graph.domain_of(node) else {
        return false;
    };
    if Some(phase_domain) == graph.common() {
        return true;
    }
    tree.domain(component).or(graph.uvm()) == Some(phase_domain)
}

/// Components visited by `node`, in execution order.
///
/// Top-down and task phases use pre-order, bottom-up phases post-order. The
/// build phase skips components that are already built.
pub fn visit_order(graph: &PhaseGraph, tree: &ComponentTree, node: NodeId) -> Vec<ComponentId> {
    let Some(imp) = graph.imp_of(node) else {
        return Vec::new();
    };
    let order = match imp.behavior {
        PhaseBehavior::Function(FunctionOrder::BottomUp) => tree.bottom_up(),
        PhaseBehavior::Function(FunctionOrder::TopDown) | PhaseBehavior::Task => tree.top_down(),
    };
    let skip_built = imp.name == BUILD_PHASE;
    order
        .into_iter()
        .filter(|c| participates(graph, tree, node, *c))
        .filter(|c| !(skip_built && tree.is_built(*c)))
        .collect()
}

/// Components notified by the `phase_started`/`ready_to_end`/`ended` hooks.
pub fn hook_order(graph: &PhaseGraph, tree: &ComponentTree, node: NodeId) -> Vec<ComponentId> {
    tree.top_down()
        .into_iter()
        .filter(|c| participates(graph, tree, node, *c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::test_support::three_level_tree;

    fn setup() -> (PhaseGraph, NodeId) {
        let mut graph = PhaseGraph::new(Diagnostics::new());
        graph.register_phases().expect("register");
        let d1 = graph.create_domain("d1").expect("domain");
        (graph, d1)
    }

    fn phase(graph: &PhaseGraph, domain: &str, name: &str) -> NodeId {
        let scope = graph.domain_by_name(domain).expect("domain");
        graph.find(scope, name, true).expect("phase")
    }

    #[test]
    fn function_orders_follow_the_tree() {
        let (graph, _) = setup();
        let (tree, ids) = three_level_tree();
        let build = visit_order(&graph, &tree, phase(&graph, "common", "build"));
        assert_eq!(build.first(), Some(&tree.root()));
        let connect = visit_order(&graph, &tree, phase(&graph, "common", "connect"));
        assert_eq!(connect.first(), Some(&ids.driver));
        assert_eq!(connect.last(), Some(&tree.root()));
    }

    #[test]
    fn domain_filter_limits_runtime_phases() {
        let (graph, d1) = setup();
        let (mut tree, ids) = three_level_tree();
        tree.set_domain(ids.agent, d1, true).expect("bind");

        let run = visit_order(&graph, &tree, phase(&graph, "common", "run"));
        assert_eq!(run.len(), tree.len());

        let uvm_main = visit_order(&graph, &tree, phase(&graph, "uvm", "main"));
        assert!(!uvm_main.contains(&ids.driver));
        assert!(uvm_main.contains(&ids.scoreboard));

        let d1_main = visit_order(&graph, &tree, phase(&graph, "d1", "main"));
        assert_eq!(d1_main, vec![ids.agent, ids.driver, ids.monitor]);
    }

    #[test]
    fn build_skips_built_components() {
        let (graph, _) = setup();
        let (mut tree, ids) = three_level_tree();
        tree.mark_built(ids.env);
        let build = visit_order(&graph, &tree, phase(&graph, "common", "build"));
        assert!(!build.contains(&ids.env));
        let connect = visit_order(&graph, &tree, phase(&graph, "common", "connect"));
        assert!(connect.contains(&ids.env));
        assert_eq!(
            hook_order(&graph, &tree, phase(&graph, "common", "build")).len(),
            tree.len()
        );
    }
}
