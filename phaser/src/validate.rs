//! Validation for `phaser validate`: scenario rules plus graph invariants.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::core::invariants::validate_graph;
use crate::core::types::PhaseKind;
use crate::io::config::RunnerConfig;
use crate::io::scenario::load_scenario;
use crate::simulate::build_runner;

/// Shape of a scenario that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    pub components: usize,
    /// Domains including the built-in `common` and `uvm`.
    pub domains: usize,
    pub phase_nodes: usize,
    pub synced_pairs: usize,
}

/// Loads a scenario, builds its runner and checks the resulting graph.
pub fn validate_scenario_file(path: &Path, base: &RunnerConfig) -> Result<ValidationSummary> {
    let scenario = load_scenario(path)?;
    let runner =
        build_runner(&scenario, base).with_context(|| format!("validate {}", path.display()))?;
    let graph = runner.graph();
    let errors = validate_graph(&graph);
    if !errors.is_empty() {
        bail!("graph invariant violations:\n- {}", errors.join("\n- "));
    }
    let synced = graph.ids().map(|id| graph.node(id).syncs().len()).sum::<usize>();
    Ok(ValidationSummary {
        components: runner.tree().len(),
        domains: graph.domains().count(),
        phase_nodes: graph
            .ids()
            .filter(|id| graph.node(*id).kind() == PhaseKind::Imp)
            .count(),
        synced_pairs: synced / 2,
    })
}
