//! Orchestration for `phaser run`: scenario file in, run report out.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::core::types::{ComponentId, NodeId};
use crate::exit_codes;
use crate::io::config::{RunnerConfig, load_config};
use crate::io::scenario::{Scenario, load_scenario, resolve_config, validate_scenario};
use crate::runtime::{PhaseRunner, RunOutcome, RunReport};
use crate::script::ScriptedComponent;
use crate::tree::ComponentTree;

/// Builds a ready-to-run runner from a validated scenario.
pub fn build_runner(scenario: &Scenario, base: &RunnerConfig) -> Result<PhaseRunner> {
    let errors = validate_scenario(scenario);
    if !errors.is_empty() {
        bail!("scenario violations:\n- {}", errors.join("\n- "));
    }
    let config = resolve_config(base, scenario)?;

    let mut tree = ComponentTree::new();
    let mut placed: Vec<ComponentId> = Vec::with_capacity(scenario.components.len());
    for spec in &scenario.components {
        let parent = match spec.parent_path() {
            Some(parent) => resolve_path(&tree, parent)?,
            None => tree.root(),
        };
        let name = spec
            .segments()
            .last()
            .copied()
            .ok_or_else(|| anyhow!("empty component path"))?;
        let id = tree
            .add_child(parent, name, ScriptedComponent::new(spec.tasks.clone()))
            .with_context(|| format!("add component {}", spec.path))?;
        placed.push(id);
    }

    let runner = PhaseRunner::with_tree(config, tree)?;
    for domain in &scenario.domains {
        runner.create_domain(&domain.name)?;
    }

    // Declaration order: a child's own domain overrides its parent's
    // hierarchical one.
    for (spec, id) in scenario.components.iter().zip(&placed) {
        let Some(domain) = &spec.domain else { continue };
        let node = domain_node(&runner, domain)?;
        runner
            .set_domain(*id, node, spec.hierarchical)
            .with_context(|| format!("bind {} to domain {domain}", spec.path))?;
    }

    for sync in &scenario.syncs {
        let a = domain_node(&runner, &sync.a)?;
        let b = domain_node(&runner, &sync.b)?;
        let pairs = runner.graph_mut().sync(
            a,
            b,
            sync.phase.as_deref(),
            sync.with_phase.as_deref(),
        )?;
        debug!(a = %sync.a, b = %sync.b, pairs, "domains synced");
    }

    if let Some(timeout) = &scenario.timeout {
        runner.set_timeout(Duration::from_millis(timeout.ms), timeout.overridable)?;
    }
    Ok(runner)
}

fn resolve_path(tree: &ComponentTree, relative: &str) -> Result<ComponentId> {
    let root = tree.name(tree.root());
    tree.lookup(&format!("{root}.{relative}"))
        .ok_or_else(|| anyhow!("component '{relative}' not found"))
}

fn domain_node(runner: &PhaseRunner, name: &str) -> Result<NodeId> {
    runner
        .graph()
        .domain_by_name(name)
        .ok_or_else(|| anyhow!("unknown domain '{name}'"))
}

/// Loads the base config (missing file means defaults) and the scenario.
pub fn load_runner(scenario_path: &Path, config_path: Option<&Path>) -> Result<PhaseRunner> {
    let base = match config_path {
        Some(path) => load_config(path).with_context(|| format!("load {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    let scenario = load_scenario(scenario_path)?;
    build_runner(&scenario, &base)
}

/// Builds and runs a scenario file.
pub fn simulate(scenario_path: &Path, config_path: Option<&Path>) -> Result<RunReport> {
    let runner = load_runner(scenario_path, config_path)?;
    let report = runner.run()?;
    Ok(report)
}

/// Maps a run outcome to the CLI exit code.
pub fn exit_code(report: &RunReport) -> i32 {
    match report.outcome {
        RunOutcome::Completed => exit_codes::OK,
        RunOutcome::TimedOut { .. } => exit_codes::TIMED_OUT,
        RunOutcome::Aborted { .. } => exit_codes::ABORTED,
    }
}
