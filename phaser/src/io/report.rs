//! Plain-text rendering of run reports and phase graphs for the CLI.

use std::fmt::Write as _;
use std::time::Duration;

use crate::core::graph::PhaseGraph;
use crate::core::types::PhaseKind;
use crate::runtime::{RunOutcome, RunReport};

fn fmt_ms(time: Duration) -> String {
    format!("{}ms", time.as_millis())
}

pub fn outcome_line(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed => "completed".to_string(),
        RunOutcome::TimedOut { at } => format!("timed out at {}", fmt_ms(*at)),
        RunOutcome::Aborted { reason } => format!("aborted: {reason}"),
    }
}

/// One line per imp-node state change: `time domain.phase from -> to`.
pub fn render_transitions(report: &RunReport) -> String {
    let mut out = String::new();
    for transition in report
        .transitions
        .iter()
        .filter(|t| t.kind == PhaseKind::Imp)
    {
        let _ = writeln!(
            out,
            "{:>8} {}.{} {} -> {}",
            fmt_ms(transition.time),
            transition.domain,
            transition.phase,
            transition.from,
            transition.to
        );
    }
    out
}

/// Outcome, end time, per-phase execution counts and every diagnostic.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "outcome: {}", outcome_line(&report.outcome));
    let _ = writeln!(out, "end time: {}", fmt_ms(report.end_time));
    let repeated: Vec<String> = report
        .run_counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(label, count)| format!("{label} x{count}"))
        .collect();
    if !repeated.is_empty() {
        let _ = writeln!(out, "repeated: {}", repeated.join(", "));
    }
    if report.diagnostics.is_empty() {
        let _ = writeln!(out, "diagnostics: none");
    } else {
        let _ = writeln!(out, "diagnostics:");
        for diag in &report.diagnostics {
            let phase = diag
                .phase
                .as_deref()
                .map(|p| format!(" [{p}]"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "- {} {} @{}{}: {}",
                diag.severity.as_str(),
                diag.id,
                fmt_ms(diag.time),
                phase,
                diag.message
            );
        }
    }
    out
}

/// Topological listing of every node with its kind and successors.
pub fn render_graph(graph: &PhaseGraph) -> String {
    let mut out = String::new();
    let Some(order) = graph.topological_order() else {
        let _ = writeln!(out, "graph contains a cycle");
        return out;
    };
    for id in order {
        let node = graph.node(id);
        let kind = match node.kind() {
            PhaseKind::Imp => "imp",
            PhaseKind::Schedule => "schedule",
            PhaseKind::Domain => "domain",
        };
        let successors: Vec<String> = node.successors().iter().map(|s| graph.label(*s)).collect();
        let mut line = format!("{} ({kind})", graph.label(id));
        if let Some(imp) = graph.imp_of(id) {
            let _ = write!(line, " {}", imp.behavior.label());
        }
        if !node.syncs().is_empty() {
            let syncs: Vec<String> = node.syncs().iter().map(|s| graph.label(*s)).collect();
            let _ = write!(line, " sync[{}]", syncs.join(", "));
        }
        if !successors.is_empty() {
            let _ = write!(line, " -> {}", successors.join(", "));
        }
        let _ = writeln!(out, "{line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::types::{NodeId, PhaseState};
    use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
    use crate::runtime::Transition;

    fn sample_report() -> RunReport {
        let mut run_counts = BTreeMap::new();
        run_counts.insert("uvm.main".to_string(), 2);
        run_counts.insert("common.build".to_string(), 1);
        RunReport {
            outcome: RunOutcome::TimedOut {
                at: Duration::from_millis(100),
            },
            end_time: Duration::from_millis(100),
            transitions: vec![
                Transition {
                    time: Duration::from_millis(5),
                    node: NodeId(3),
                    kind: PhaseKind::Imp,
                    domain: "uvm".to_string(),
                    phase: "main".to_string(),
                    from: PhaseState::Executing,
                    to: PhaseState::ReadyToEnd,
                },
                Transition {
                    time: Duration::from_millis(5),
                    node: NodeId(1),
                    kind: PhaseKind::Schedule,
                    domain: "uvm".to_string(),
                    phase: "uvm_sched".to_string(),
                    from: PhaseState::Dormant,
                    to: PhaseState::Scheduled,
                },
            ],
            diagnostics: vec![Diagnostic {
                severity: Severity::Fatal,
                id: "phase-timeout".to_string(),
                message: "explicit timeout hit".to_string(),
                time: Duration::from_millis(100),
                phase: None,
            }],
            run_counts,
        }
    }

    #[test]
    fn transitions_list_imp_nodes_only() {
        let text = render_transitions(&sample_report());
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("uvm.main executing -> ready_to_end"), "{text}");
    }

    #[test]
    fn summary_includes_outcome_and_diagnostics() {
        let text = render_summary(&sample_report());
        assert!(text.contains("outcome: timed out at 100ms"), "{text}");
        assert!(text.contains("repeated: uvm.main x2"), "{text}");
        assert!(text.contains("- fatal phase-timeout @100ms: explicit timeout hit"), "{text}");
    }

    #[test]
    fn graph_listing_starts_at_common() {
        let mut graph = PhaseGraph::new(Diagnostics::new());
        graph.register_phases().expect("register");
        let text = render_graph(&graph);
        let first = text.lines().next().expect("first line");
        assert!(first.starts_with("common (domain)"), "{first}");
        assert!(text.contains("common.build (imp) top-down"), "{text}");
        assert!(text.contains("uvm.main (imp) task"), "{text}");
    }
}
