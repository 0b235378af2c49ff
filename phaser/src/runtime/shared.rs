//! Run state shared by the hopper, node drivers, drain monitors and handles.
//!
//! Everything lives on one thread. Borrows of the graph and the tree are
//! never held across an `.await` or a component callback; every mutation is
//! applied in a single non-suspending step and then announced by bumping the
//! epoch, which wakes every waiter so it can re-check its condition.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::component::{Component, ObjectionEvent};
use crate::core::graph::PhaseGraph;
use crate::core::types::{ComponentId, NodeId, PhaseKind, PhaseState};
use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
use crate::io::config::RunnerConfig;
use crate::tree::ComponentTree;

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub time: Duration,
    pub node: NodeId,
    pub kind: PhaseKind,
    pub domain: String,
    pub phase: String,
    pub from: PhaseState,
    pub to: PhaseState,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutSetting {
    pub(crate) duration: Duration,
    pub(crate) overridable: bool,
}

/// Objection notification waiting for its component to be free.
pub(crate) enum Hook {
    Raised(ObjectionEvent),
    Dropped(ObjectionEvent),
    AllDropped(ObjectionEvent),
}

impl Hook {
    fn deliver(&self, component: &mut dyn Component) {
        match self {
            Self::Raised(event) => component.raised(event),
            Self::Dropped(event) => component.dropped(event),
            Self::AllDropped(event) => component.all_dropped(event),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) graph: RefCell<PhaseGraph>,
    pub(crate) tree: RefCell<ComponentTree>,
    pub(crate) config: RunnerConfig,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) timeout: Cell<TimeoutSetting>,
    epoch: watch::Sender<u64>,
    start: Cell<Option<Instant>>,
    transitions: RefCell<Vec<Transition>>,
    tasks: RefCell<BTreeMap<NodeId, Vec<AbortHandle>>>,
    pub(crate) drains: RefCell<BTreeMap<NodeId, AbortHandle>>,
    deferred: RefCell<VecDeque<(ComponentId, Hook)>>,
    /// Jumps requested before a run; armed by `begin_run`.
    pub(crate) queued_jumps: RefCell<BTreeMap<NodeId, NodeId>>,
    fatal: RefCell<Option<String>>,
}

impl Shared {
    pub(crate) fn new(
        graph: PhaseGraph,
        tree: ComponentTree,
        config: RunnerConfig,
        diagnostics: Diagnostics,
    ) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            graph: RefCell::new(graph),
            tree: RefCell::new(tree),
            timeout: Cell::new(TimeoutSetting {
                duration: config.timeout(),
                overridable: config.timeout_overridable,
            }),
            config,
            diagnostics,
            epoch,
            start: Cell::new(None),
            transitions: RefCell::new(Vec::new()),
            tasks: RefCell::new(BTreeMap::new()),
            drains: RefCell::new(BTreeMap::new()),
            deferred: RefCell::new(VecDeque::new()),
            queued_jumps: RefCell::new(BTreeMap::new()),
            fatal: RefCell::new(None),
        }
    }

    /// Resets per-run state and starts the virtual clock.
    pub(crate) fn begin_run(&self) {
        {
            let mut graph = self.graph.borrow_mut();
            graph.reset_for_run();
            for (from, target) in std::mem::take(&mut *self.queued_jumps.borrow_mut()) {
                graph.node_mut(from).jump_target = Some(target);
            }
        }
        self.transitions.borrow_mut().clear();
        self.tasks.borrow_mut().clear();
        self.drains.borrow_mut().clear();
        self.deferred.borrow_mut().clear();
        *self.fatal.borrow_mut() = None;
        self.start.set(Some(Instant::now()));
    }

    /// Virtual time since the start of the current run.
    pub(crate) fn now(&self) -> Duration {
        self.start
            .get()
            .map_or(Duration::ZERO, |start| Instant::now().duration_since(start))
    }

    pub(crate) fn deadline(&self) -> Instant {
        let start = self.start.get().unwrap_or_else(Instant::now);
        start + self.timeout.get().duration
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    /// Wakes every waiter.
    pub(crate) fn bump(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Suspends until `ready` holds, re-checking after every state change.
    pub(crate) async fn wait_until(&self, mut ready: impl FnMut(&Self) -> bool) {
        let mut epoch = self.subscribe();
        while !ready(self) {
            if epoch.changed().await.is_err() {
                return;
            }
        }
    }

    pub(crate) fn state(&self, node: NodeId) -> PhaseState {
        self.graph.borrow().node(node).state()
    }

    pub(crate) fn set_state(&self, node: NodeId, to: PhaseState) {
        let (from, kind, domain, phase) = {
            let mut graph = self.graph.borrow_mut();
            let from = graph.node(node).state();
            if from == to {
                return;
            }
            graph.node_mut(node).state = to;
            let kind = graph.node(node).kind();
            (from, kind, graph.domain_name(node), graph.node(node).name().to_string())
        };
        let time = self.now();
        if self.config.trace_phases {
            info!(domain = %domain, phase = %phase, %from, %to, at_ms = time.as_millis() as u64, "phase transition");
        } else {
            debug!(domain = %domain, phase = %phase, %from, %to, at_ms = time.as_millis() as u64, "phase transition");
        }
        self.transitions.borrow_mut().push(Transition {
            time,
            node,
            kind,
            domain,
            phase,
            from,
            to,
        });
        self.bump();
    }

    pub(crate) fn transitions(&self) -> Vec<Transition> {
        self.transitions.borrow().clone()
    }

    pub(crate) fn label(&self, node: NodeId) -> String {
        self.graph.borrow().label(node)
    }

    /// Records a diagnostic stamped with the current virtual time.
    pub(crate) fn report(&self, severity: Severity, id: &str, node: Option<NodeId>, message: String) {
        self.diagnostics.report(Diagnostic {
            severity,
            id: id.to_string(),
            message,
            time: self.now(),
            phase: node.map(|n| self.label(n)),
        });
    }

    /// Marks the run as failed; the hopper aborts everything on its next turn.
    pub(crate) fn fail(&self, id: &str, node: Option<NodeId>, message: String) {
        self.report(Severity::Fatal, id, node, message.clone());
        let mut fatal = self.fatal.borrow_mut();
        if fatal.is_none() {
            *fatal = Some(message);
        }
        drop(fatal);
        self.bump();
    }

    pub(crate) fn fatal_reason(&self) -> Option<String> {
        self.fatal.borrow().clone()
    }

    pub(crate) fn register_task(&self, node: NodeId, handle: AbortHandle) {
        self.tasks.borrow_mut().entry(node).or_default().push(handle);
    }

    /// Aborts every task forked for `node`.
    pub(crate) fn kill_tasks(&self, node: NodeId) {
        let handles = self.tasks.borrow_mut().remove(&node).unwrap_or_default();
        if !handles.is_empty() {
            debug!(phase = %self.label(node), count = handles.len(), "cancelling phase tasks");
        }
        for handle in handles {
            handle.abort();
        }
    }

    pub(crate) fn kill_all_tasks(&self) {
        let nodes: Vec<NodeId> = self.tasks.borrow().keys().copied().collect();
        for node in nodes {
            self.kill_tasks(node);
        }
        let drains = std::mem::take(&mut *self.drains.borrow_mut());
        for handle in drains.into_values() {
            handle.abort();
        }
    }

    /// Runs `f` against a component's behaviour, then flushes notifications
    /// that were deferred because the component was busy.
    pub(crate) fn with_component<R>(
        &self,
        component: ComponentId,
        f: impl FnOnce(&mut dyn Component) -> R,
    ) -> Option<R> {
        let behavior = self.tree.borrow().behavior(component)?;
        let out = {
            let mut guard = behavior.borrow_mut();
            f(&mut *guard)
        };
        self.flush_deferred();
        Some(out)
    }

    /// Delivers an objection notification now, or queues it when the
    /// component is the one currently executing.
    pub(crate) fn notify(&self, component: ComponentId, hook: Hook) {
        let Some(behavior) = self.tree.borrow().behavior(component) else {
            return;
        };
        match behavior.try_borrow_mut() {
            Ok(mut guard) => hook.deliver(&mut *guard),
            Err(_) => self.deferred.borrow_mut().push_back((component, hook)),
        }
    }

    fn flush_deferred(&self) {
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        for (component, hook) in pending {
            self.notify(component, hook);
        }
    }
}
