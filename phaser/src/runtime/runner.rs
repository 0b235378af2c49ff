//! The phase hopper and its public entry point, [`PhaseRunner`].
//!
//! A run builds a current-thread tokio runtime whose clock starts paused, so
//! virtual time advances only when every task is blocked on a timer. Each
//! scheduled node gets a driver task; drivers report back over an unbounded
//! channel and the hopper schedules successors, applies jumps and enforces
//! the global timeout.

use std::cell::{Ref, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, LocalSet};
use tracing::{debug, info, warn};

use crate::core::graph::{JumpDirection, PhaseGraph};
use crate::core::types::{ComponentId, NodeId, PhaseKind, PhaseState};
use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
use crate::error::PhaseError;
use crate::io::config::RunnerConfig;
use crate::runtime::execute::{NodeExit, execute_node};
use crate::runtime::shared::{Shared, Transition};
use crate::tree::ComponentTree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    TimedOut { at: Duration },
    Aborted { reason: String },
}

/// Everything observable about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub end_time: Duration,
    pub transitions: Vec<Transition>,
    pub diagnostics: Vec<Diagnostic>,
    /// `domain.phase` label → completed executions.
    pub run_counts: BTreeMap<String, u32>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Transitions of one phase, in order.
    pub fn transitions_of<'a>(
        &'a self,
        domain: &'a str,
        phase: &'a str,
    ) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.domain == domain && t.phase == phase)
    }

    /// First time the phase entered `state`.
    pub fn time_of(&self, domain: &str, phase: &str, state: PhaseState) -> Option<Duration> {
        self.transitions_of(domain, phase)
            .find(|t| t.to == state)
            .map(|t| t.time)
    }

    /// Last time the phase entered `state`.
    pub fn last_time_of(&self, domain: &str, phase: &str, state: PhaseState) -> Option<Duration> {
        self.transitions_of(domain, phase)
            .filter(|t| t.to == state)
            .last()
            .map(|t| t.time)
    }

    /// States the phase entered, in order.
    pub fn states_of(&self, domain: &str, phase: &str) -> Vec<PhaseState> {
        self.transitions_of(domain, phase).map(|t| t.to).collect()
    }

    pub fn run_count(&self, domain: &str, phase: &str) -> u32 {
        self.run_counts
            .get(&format!("{domain}.{phase}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn diagnostics_with(&self, id: &str) -> impl Iterator<Item = &Diagnostic> + '_ {
        let id = id.to_string();
        self.diagnostics.iter().filter(move |d| d.id == id)
    }
}

/// Owns the phase graph, the component tree and the run configuration.
pub struct PhaseRunner {
    shared: Rc<Shared>,
}

impl PhaseRunner {
    /// Runner with an empty component tree (just the `top` root).
    pub fn new(config: RunnerConfig) -> Result<Self, PhaseError> {
        Self::with_tree(config, ComponentTree::new())
    }

    /// Validates `config` and registers the built-in phases.
    pub fn with_tree(config: RunnerConfig, tree: ComponentTree) -> Result<Self, PhaseError> {
        config
            .validate()
            .map_err(|err| PhaseError::InvalidConfig(format!("{err:#}")))?;
        let diagnostics = Diagnostics::new();
        let mut graph = PhaseGraph::new(diagnostics.clone());
        graph.register_phases()?;
        Ok(Self {
            shared: Rc::new(Shared::new(graph, tree, config, diagnostics)),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.shared.config
    }

    pub fn graph(&self) -> Ref<'_, PhaseGraph> {
        self.shared.graph.borrow()
    }

    pub fn graph_mut(&self) -> RefMut<'_, PhaseGraph> {
        self.shared.graph.borrow_mut()
    }

    pub fn tree(&self) -> Ref<'_, ComponentTree> {
        self.shared.tree.borrow()
    }

    pub fn tree_mut(&self) -> RefMut<'_, ComponentTree> {
        self.shared.tree.borrow_mut()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.shared.diagnostics
    }

    /// Creates (or reuses) a user domain.
    pub fn create_domain(&self, name: &str) -> Result<NodeId, PhaseError> {
        self.shared.graph.borrow_mut().create_domain(name)
    }

    /// Binds a component (and with `hierarchical` its subtree) to a domain.
    pub fn set_domain(
        &self,
        component: ComponentId,
        domain: NodeId,
        hierarchical: bool,
    ) -> Result<(), PhaseError> {
        {
            let graph = self.shared.graph.borrow();
            let node = graph.get(domain).ok_or(PhaseError::UnknownNode(domain))?;
            if graph.domain_by_name(node.name()) != Some(domain) {
                return Err(PhaseError::NotADomain(node.name().to_string()));
            }
        }
        self.shared
            .tree
            .borrow_mut()
            .set_domain(component, domain, hierarchical)
    }

    /// Replaces the global timeout unless an earlier call locked it.
    pub fn set_timeout(&self, duration: Duration, overridable: bool) -> Result<(), PhaseError> {
        self.shared.set_timeout(duration, overridable)
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout.get().duration
    }

    /// Queues a jump for the next run: when `from` reaches its first jump
    /// checkpoint it jumps to `target`, as if its own component had called
    /// [`PhaseHandle::jump`](crate::runtime::PhaseHandle::jump).
    ///
    /// Only phase implementation nodes consume jumps; schedule and domain
    /// nodes are rejected.
    pub fn jump(&self, from: NodeId, target: NodeId) -> Result<NodeId, PhaseError> {
        self.shared.queue_jump(from, target)
    }

    /// Runs every domain from the common domain's begin node.
    pub fn run(&self) -> Result<RunReport, PhaseError> {
        let entry = self.shared.graph.borrow_mut().common_domain()?;
        self.run_from(entry)
    }

    /// Runs the graph starting at `entry`.
    pub fn run_from(&self, entry: NodeId) -> Result<RunReport, PhaseError> {
        if !self.shared.graph.borrow().contains(entry) {
            return Err(PhaseError::UnknownNode(entry));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(|err| PhaseError::Executor(err.to_string()))?;
        let local = LocalSet::new();
        let (outcome, end_time) = local.block_on(&runtime, hop(Rc::clone(&self.shared), entry));
        drop(local);
        Ok(self.report(outcome, end_time))
    }

    fn report(&self, outcome: RunOutcome, end_time: Duration) -> RunReport {
        let graph = self.shared.graph.borrow();
        let run_counts = graph
            .ids()
            .filter(|id| graph.node(*id).imp().is_some())
            .map(|id| (graph.label(id), graph.node(id).run_count()))
            .collect();
        RunReport {
            outcome,
            end_time,
            transitions: self.shared.transitions(),
            diagnostics: self.shared.diagnostics.entries(),
            run_counts,
        }
    }
}

impl Shared {
    pub(crate) fn set_timeout(&self, duration: Duration, overridable: bool) -> Result<(), PhaseError> {
        let current = self.timeout.get();
        if !current.overridable {
            self.report(
                Severity::Warning,
                "timeout-locked",
                None,
                format!(
                    "timeout is locked at {:?}; ignoring request for {duration:?}",
                    current.duration
                ),
            );
            return Err(PhaseError::TimeoutLocked {
                current: current.duration,
            });
        }
        self.timeout.set(crate::runtime::shared::TimeoutSetting {
            duration,
            overridable,
        });
        self.bump();
        Ok(())
    }

    /// Records a one-shot jump request on `from`; consumed by its driver.
    pub(crate) fn request_jump(&self, from: NodeId, target: NodeId) -> Result<NodeId, PhaseError> {
        let plan = {
            let graph = self.graph.borrow();
            if !graph.contains(from) {
                return Err(PhaseError::UnknownNode(from));
            }
            if !graph.contains(target) {
                return Err(PhaseError::UnknownNode(target));
            }
            graph.jump_plan(from, target)
        };
        if let Err(err) = plan {
            self.fail("phase-bad-jump", Some(from), err.to_string());
            return Err(err);
        }
        info!(from = %self.label(from), to = %self.label(target), "jump requested");
        self.graph.borrow_mut().node_mut(from).jump_target = Some(target);
        self.bump();
        Ok(target)
    }
}

impl Shared {
    pub(crate) fn queue_jump(&self, from: NodeId, target: NodeId) -> Result<NodeId, PhaseError> {
        {
            let graph = self.graph.borrow();
            if !graph.contains(from) {
                return Err(PhaseError::UnknownNode(from));
            }
            if !graph.contains(target) {
                return Err(PhaseError::UnknownNode(target));
            }
            if graph.node(from).kind() != PhaseKind::Imp {
                return Err(PhaseError::NotAnImp(graph.label(from)));
            }
            graph.jump_plan(from, target)?;
        }
        debug!(from = %self.label(from), to = %self.label(target), "jump queued for next run");
        self.queued_jumps.borrow_mut().insert(from, target);
        Ok(target)
    }
}

struct Hopper {
    shared: Rc<Shared>,
    done_tx: mpsc::UnboundedSender<NodeExit>,
    active: BTreeMap<NodeId, AbortHandle>,
}

impl Hopper {
    fn schedule(&mut self, node: NodeId) {
        self.shared.set_state(node, PhaseState::Scheduled);
        let shared = Rc::clone(&self.shared);
        let done_tx = self.done_tx.clone();
        let driver = tokio::task::spawn_local(async move {
            let exit = execute_node(shared, node).await;
            let _ = done_tx.send(exit);
        });
        self.active.insert(node, driver.abort_handle());
    }

    /// Stops a node's driver and everything it forked.
    fn halt(&mut self, node: NodeId) {
        if let Some(driver) = self.active.remove(&node) {
            driver.abort();
        }
        self.shared.kill_tasks(node);
        self.shared.clear_objection(node);
    }

    fn on_done(&mut self, node: NodeId) {
        self.active.remove(&node);
        let ready: Vec<NodeId> = {
            let graph = self.shared.graph.borrow();
            graph
                .node(node)
                .successors()
                .iter()
                .copied()
                .filter(|succ| {
                    let succ_node = graph.node(*succ);
                    succ_node.state() == PhaseState::Dormant
                        && succ_node
                            .predecessors()
                            .iter()
                            .all(|p| graph.node(*p).state() == PhaseState::Done)
                })
                .collect()
        };
        for succ in ready {
            self.schedule(succ);
        }
    }

    fn on_jump(&mut self, from: NodeId, target: NodeId) {
        self.active.remove(&from);
        let plan = self.shared.graph.borrow().jump_plan(from, target);
        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                self.shared
                    .fail("phase-bad-jump", Some(from), err.to_string());
                return;
            }
        };
        info!(
            from = %self.shared.label(from),
            to = %self.shared.label(target),
            direction = ?plan.direction,
            at_ms = self.shared.now().as_millis() as u64,
            "jumping"
        );
        for skipped in &plan.skipped {
            self.halt(*skipped);
            self.shared.set_state(*skipped, PhaseState::Done);
        }
        for reset in &plan.reset {
            self.halt(*reset);
            self.shared.set_state(*reset, PhaseState::Dormant);
        }
        let from_state = match plan.direction {
            JumpDirection::Backward => PhaseState::Dormant,
            JumpDirection::Forward => PhaseState::Done,
        };
        self.shared.set_state(from, from_state);
        // A join target still waits for predecessors outside the jump path.
        let ready = {
            let graph = self.shared.graph.borrow();
            graph
                .node(target)
                .predecessors()
                .iter()
                .all(|p| graph.node(*p).state() == PhaseState::Done)
        };
        if ready {
            self.schedule(target);
        } else {
            debug!(target = %self.shared.label(target), "jump target waits for its predecessors");
        }
    }

    /// Ends the run fatally: cancels every driver and task, then gives every
    /// component its `pre_abort` call, bottom-up.
    fn abort_all(&mut self) {
        for (_, driver) in std::mem::take(&mut self.active) {
            driver.abort();
        }
        self.shared.kill_all_tasks();
        let order = self.shared.tree.borrow().bottom_up();
        for component in order {
            self.shared.with_component(component, |c| c.pre_abort());
        }
    }
}

async fn hop(shared: Rc<Shared>, entry: NodeId) -> (RunOutcome, Duration) {
    shared.begin_run();
    info!(entry = %shared.label(entry), timeout_ms = shared.timeout.get().duration.as_millis() as u64, "run started");
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut epoch = shared.subscribe();
    let mut hopper = Hopper {
        shared: Rc::clone(&shared),
        done_tx,
        active: BTreeMap::new(),
    };
    hopper.schedule(entry);

    loop {
        if let Some(reason) = shared.fatal_reason() {
            hopper.abort_all();
            info!(%reason, at_ms = shared.now().as_millis() as u64, "run aborted");
            return (RunOutcome::Aborted { reason }, shared.now());
        }
        if hopper.active.is_empty() {
            info!(at_ms = shared.now().as_millis() as u64, "run completed");
            return (RunOutcome::Completed, shared.now());
        }
        let deadline = shared.deadline();
        tokio::select! {
            biased;
            Some(exit) = done_rx.recv() => match exit {
                NodeExit::Done(node) => hopper.on_done(node),
                NodeExit::Jumped { from, target } => hopper.on_jump(from, target),
                NodeExit::Halted(node) => {
                    hopper.active.remove(&node);
                }
            },
            _ = epoch.changed() => {}
            () = tokio::time::sleep_until(deadline) => {
                let at = shared.now();
                let pending: Vec<String> = hopper
                    .active
                    .keys()
                    .map(|node| shared.label(*node))
                    .collect();
                shared.report(
                    Severity::Fatal,
                    "phase-timeout",
                    None,
                    format!(
                        "explicit timeout of {:?} hit while waiting on: {}",
                        shared.timeout.get().duration,
                        pending.join(", ")
                    ),
                );
                warn!(at_ms = at.as_millis() as u64, "run timed out");
                hopper.abort_all();
                return (RunOutcome::TimedOut { at }, at);
            }
        }
    }
}
