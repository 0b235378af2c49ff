//! Structural invariants of a phase graph.

use crate::core::graph::PhaseGraph;
use crate::core::types::PhaseKind;

/// Check structural invariants:
/// - edges are acyclic
/// - predecessor and successor sets mirror each other
/// - imp nodes carry an imp; schedule/domain nodes come in begin/end pairs
/// - sync partners are imp nodes and the relation is symmetric
pub fn validate_graph(graph: &PhaseGraph) -> Vec<String> {
    let mut errors = Vec::new();

    if graph.topological_order().is_none() {
        errors.push("phase graph contains a cycle".to_string());
    }

    for id in graph.ids() {
        let node = graph.node(id);
        let label = graph.label(id);

        for succ in node.successors() {
            if !graph.node(*succ).predecessors().contains(&id) {
                errors.push(format!(
                    "{label}: successor {} does not list it as predecessor",
                    graph.label(*succ)
                ));
            }
        }
        for pred in node.predecessors() {
            if !graph.node(*pred).successors().contains(&id) {
                errors.push(format!(
                    "{label}: predecessor {} does not list it as successor",
                    graph.label(*pred)
                ));
            }
        }

        match node.kind() {
            PhaseKind::Imp if node.imp().is_none() => {
                errors.push(format!("{label}: imp node without an imp"));
            }
            PhaseKind::Schedule | PhaseKind::Domain => {
                let paired = match (node.begin, node.end) {
                    (Some(begin), None) => graph.node(begin).end == Some(id),
                    (None, Some(end)) => graph.node(end).begin == Some(id),
                    _ => false,
                };
                if !paired {
                    errors.push(format!("{label}: schedule node without a matching begin/end"));
                }
            }
            _ => {}
        }

        for partner in node.syncs() {
            if graph.node(*partner).kind() != PhaseKind::Imp {
                errors.push(format!("{label}: synced to non-imp node"));
            }
            if !graph.node(*partner).syncs().contains(&id) {
                errors.push(format!(
                    "{label}: sync with {} is not symmetric",
                    graph.label(*partner)
                ));
            }
        }
    }

    errors
}
