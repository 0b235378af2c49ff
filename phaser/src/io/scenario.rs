//! Scenario files: a scripted testbench described in TOML.
//!
//! ```toml
//! [config]
//! default_drain_ms = 2
//!
//! [[domains]]
//! name = "d1"
//!
//! [[syncs]]
//! a = "uvm"
//! b = "d1"
//!
//! [[components]]
//! path = "env.agent"
//! domain = "d1"
//!
//! [[components.tasks]]
//! phase = "main"
//! steps = [{ op = "raise" }, { op = "wait", ms = 10 }, { op = "drop" }]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::domain::{COMMON_DOMAIN, COMMON_PHASES, RUN_PHASE, RUNTIME_PHASES, UVM_DOMAIN};
use crate::io::config::RunnerConfig;
use crate::script::{Step, TaskScript};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    /// Overrides applied on top of the base configuration, key by key.
    pub config: Option<toml::Table>,
    pub timeout: Option<TimeoutSpec>,
    pub domains: Vec<DomainSpec>,
    pub syncs: Vec<SyncSpec>,
    pub components: Vec<ComponentSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSpec {
    pub ms: u64,
    #[serde(default = "default_true")]
    pub overridable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainSpec {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSpec {
    pub a: String,
    pub b: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub with_phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    /// Dotted path below the root, e.g. `env.agent`.
    pub path: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Whether `domain` also applies to the component's descendants.
    #[serde(default = "default_true")]
    pub hierarchical: bool,
    #[serde(default)]
    pub tasks: Vec<TaskScript>,
}

impl ComponentSpec {
    /// Path segments; the last one is the component's name.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('.').collect()
    }

    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }
}

/// Load a scenario from a TOML file.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_scenario(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_scenario(contents: &str) -> Result<Scenario> {
    toml::from_str(contents).context("parse scenario toml")
}

/// Applies the scenario's `[config]` overrides to `base`.
pub fn resolve_config(base: &RunnerConfig, scenario: &Scenario) -> Result<RunnerConfig> {
    let Some(overrides) = &scenario.config else {
        return Ok(base.clone());
    };
    let mut merged = toml::Value::try_from(base).context("serialize base config")?;
    let table = merged
        .as_table_mut()
        .ok_or_else(|| anyhow!("base config did not serialize to a table"))?;
    for (key, value) in overrides {
        table.insert(key.clone(), value.clone());
    }
    let cfg: RunnerConfig = merged.try_into().context("apply [config] overrides")?;
    cfg.validate()?;
    Ok(cfg)
}

fn is_known_phase(name: &str) -> bool {
    RUNTIME_PHASES.contains(&name) || COMMON_PHASES.iter().any(|(common, _)| *common == name)
}

fn is_task_phase(name: &str) -> bool {
    name == RUN_PHASE || RUNTIME_PHASES.contains(&name)
}

/// Check scenario rules not expressible in the TOML shape:
/// - domain names unique and not built-in
/// - component paths unique, with parents declared first
/// - referenced domains and phases exist
/// - script steps have positive counts
pub fn validate_scenario(scenario: &Scenario) -> Vec<String> {
    let mut errors = Vec::new();

    let mut domains: BTreeSet<&str> = BTreeSet::from([COMMON_DOMAIN, UVM_DOMAIN]);
    for domain in &scenario.domains {
        if domain.name.trim().is_empty() {
            errors.push("domain name must be non-empty".to_string());
        } else if !domains.insert(domain.name.as_str()) {
            errors.push(format!("duplicate domain '{}'", domain.name));
        }
    }

    for (index, sync) in scenario.syncs.iter().enumerate() {
        for name in [&sync.a, &sync.b] {
            if !domains.contains(name.as_str()) || name == COMMON_DOMAIN {
                errors.push(format!("syncs[{index}]: unknown runtime domain '{name}'"));
            }
        }
        for phase in [&sync.phase, &sync.with_phase].into_iter().flatten() {
            if !RUNTIME_PHASES.contains(&phase.as_str()) {
                errors.push(format!("syncs[{index}]: unknown runtime phase '{phase}'"));
            }
        }
        if sync.phase.is_none() && sync.with_phase.is_some() {
            errors.push(format!("syncs[{index}]: with_phase requires phase"));
        }
    }

    let mut paths: BTreeSet<&str> = BTreeSet::new();
    for component in &scenario.components {
        let path = component.path.as_str();
        if component.segments().iter().any(|s| s.trim().is_empty()) {
            errors.push(format!("component path '{path}' has an empty segment"));
            continue;
        }
        if let Some(parent) = component.parent_path() {
            if !paths.contains(parent) {
                errors.push(format!("{path}: parent '{parent}' must be declared first"));
            }
        }
        if !paths.insert(path) {
            errors.push(format!("duplicate component '{path}'"));
        }
        if let Some(domain) = &component.domain {
            if !domains.contains(domain.as_str()) {
                errors.push(format!("{path}: unknown domain '{domain}'"));
            }
        }
        validate_tasks(path, &component.tasks, &mut errors);
    }

    if let Some(timeout) = &scenario.timeout {
        if timeout.ms == 0 {
            errors.push("timeout.ms must be > 0".to_string());
        }
    }

    errors
}

fn validate_tasks(path: &str, tasks: &[TaskScript], errors: &mut Vec<String>) {
    let mut phases = BTreeSet::new();
    for task in tasks {
        if !is_task_phase(&task.phase) {
            errors.push(format!("{path}: '{}' is not a task phase", task.phase));
        }
        if !phases.insert(task.phase.as_str()) {
            errors.push(format!("{path}: duplicate task for '{}'", task.phase));
        }
        for (index, step) in task.steps.iter().enumerate() {
            let at = format!("{path}/{}[{index}]", task.phase);
            match step {
                Step::Raise { count, .. } | Step::Drop { count, .. } if *count == 0 => {
                    errors.push(format!("{at}: count must be > 0"));
                }
                Step::Jump { to, times } => {
                    if !is_known_phase(to) {
                        errors.push(format!("{at}: unknown jump target '{to}'"));
                    }
                    if *times == 0 {
                        errors.push(format!("{at}: times must be > 0"));
                    }
                }
                _ => {}
            }
        }
    }
}
