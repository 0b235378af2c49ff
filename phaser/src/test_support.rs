//! Test-only helpers: a fixed component hierarchy and recording components.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::component::{Component, Inert, ObjectionEvent, TaskFuture};
use crate::core::types::ComponentId;
use crate::io::config::RunnerConfig;
use crate::runtime::{PhaseHandle, PhaseRunner};
use crate::script::ScriptedComponent;
use crate::tree::ComponentTree;

/// Ids of the components built by [`three_level_tree`].
#[derive(Debug, Clone, Copy)]
pub struct TreeIds {
    pub env: ComponentId,
    pub agent: ComponentId,
    pub driver: ComponentId,
    pub monitor: ComponentId,
    pub scoreboard: ComponentId,
}

/// `top → env → {agent → {driver, monitor}, scoreboard}` with inert components.
pub fn three_level_tree() -> (ComponentTree, TreeIds) {
    let mut tree = ComponentTree::new();
    let root = tree.root();
    let env = tree.add_child(root, "env", Inert).expect("env");
    let scoreboard = tree.add_child(env, "scoreboard", Inert).expect("scoreboard");
    let agent = tree.add_child(env, "agent", Inert).expect("agent");
    let monitor = tree.add_child(agent, "monitor", Inert).expect("monitor");
    let driver = tree.add_child(agent, "driver", Inert).expect("driver");
    (
        tree,
        TreeIds {
            env,
            agent,
            driver,
            monitor,
            scoreboard,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Function,
    Task,
    PhaseStarted,
    ReadyToEnd,
    PhaseEnded,
    Raised,
    Dropped,
    AllDropped,
    PreAbort,
}

/// One callback observed by a [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub component: String,
    pub kind: EventKind,
    /// Phase name (or objection phase label for objection callbacks).
    pub phase: String,
    pub time: Duration,
}

/// Shared log written by every recorder of a test.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, component: &str, kind: EventKind, phase: String, time: Duration) {
        self.events.borrow_mut().push(Event {
            component: component.to_string(),
            kind,
            phase,
            time,
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Components that saw `kind` for `phase`, in call order.
    pub fn components(&self, kind: EventKind, phase: &str) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.kind == kind && e.phase == phase)
            .map(|e| e.component.clone())
            .collect()
    }

    /// Events of `kind` seen by `component`.
    pub fn of(&self, component: &str, kind: EventKind) -> Vec<Event> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.kind == kind && e.component == component)
            .cloned()
            .collect()
    }
}

type ReadyToEndHook = Box<dyn FnMut(&PhaseHandle)>;

/// Component that logs every callback and optionally runs a task script.
pub struct Recorder {
    name: String,
    log: EventLog,
    script: Option<ScriptedComponent>,
    on_ready_to_end: Option<ReadyToEndHook>,
}

impl Recorder {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            script: None,
            on_ready_to_end: None,
        }
    }

    pub fn with_script(mut self, script: ScriptedComponent) -> Self {
        self.script = Some(script);
        self
    }

    pub fn on_ready_to_end(mut self, hook: impl FnMut(&PhaseHandle) + 'static) -> Self {
        self.on_ready_to_end = Some(Box::new(hook));
        self
    }

    fn record_objection(&self, kind: EventKind, event: &ObjectionEvent) {
        self.log.push(&self.name, kind, event.phase.clone(), event.time);
    }
}

impl Component for Recorder {
    fn exec_function(&mut self, phase: &PhaseHandle) {
        self.log
            .push(&self.name, EventKind::Function, phase.name(), phase.now());
    }

    fn exec_task(&mut self, phase: PhaseHandle) -> Option<TaskFuture> {
        self.log
            .push(&self.name, EventKind::Task, phase.name(), phase.now());
        self.script.as_mut()?.exec_task(phase)
    }

    fn phase_started(&mut self, phase: &PhaseHandle) {
        self.log
            .push(&self.name, EventKind::PhaseStarted, phase.name(), phase.now());
    }

    fn phase_ready_to_end(&mut self, phase: &PhaseHandle) {
        self.log
            .push(&self.name, EventKind::ReadyToEnd, phase.name(), phase.now());
        if let Some(hook) = self.on_ready_to_end.as_mut() {
            hook(phase);
        }
    }

    fn phase_ended(&mut self, phase: &PhaseHandle) {
        self.log
            .push(&self.name, EventKind::PhaseEnded, phase.name(), phase.now());
    }

    fn raised(&mut self, event: &ObjectionEvent) {
        self.record_objection(EventKind::Raised, event);
    }

    fn dropped(&mut self, event: &ObjectionEvent) {
        self.record_objection(EventKind::Dropped, event);
    }

    fn all_dropped(&mut self, event: &ObjectionEvent) {
        self.record_objection(EventKind::AllDropped, event);
    }

    fn pre_abort(&mut self) {
        self.log
            .push(&self.name, EventKind::PreAbort, String::new(), Duration::ZERO);
    }
}

/// [`three_level_tree`] with a [`Recorder`] at every level (root included).
pub fn recorded_tree(log: &EventLog) -> (ComponentTree, TreeIds) {
    let mut tree = ComponentTree::with_root("top", Recorder::new("top", log));
    let root = tree.root();
    let env = tree
        .add_child(root, "env", Recorder::new("env", log))
        .expect("env");
    let scoreboard = tree
        .add_child(env, "scoreboard", Recorder::new("scoreboard", log))
        .expect("scoreboard");
    let agent = tree
        .add_child(env, "agent", Recorder::new("agent", log))
        .expect("agent");
    let monitor = tree
        .add_child(agent, "monitor", Recorder::new("monitor", log))
        .expect("monitor");
    let driver = tree
        .add_child(agent, "driver", Recorder::new("driver", log))
        .expect("driver");
    (
        tree,
        TreeIds {
            env,
            agent,
            driver,
            monitor,
            scoreboard,
        },
    )
}

/// Runner over `tree` with `config`.
pub fn runner_with(tree: ComponentTree, config: RunnerConfig) -> PhaseRunner {
    PhaseRunner::with_tree(config, tree).expect("runner")
}

/// Runner whose root is a [`Recorder`] and whose children are the given
/// named scripted recorders.
pub fn scripted_runner(
    log: &EventLog,
    config: RunnerConfig,
    children: Vec<(&str, ScriptedComponent)>,
) -> (PhaseRunner, Vec<ComponentId>) {
    let mut tree = ComponentTree::with_root("top", Recorder::new("top", log));
    let root = tree.root();
    let ids = children
        .into_iter()
        .map(|(name, script)| {
            tree.add_child(root, name, Recorder::new(name, log).with_script(script))
                .expect("child")
        })
        .collect();
    (runner_with(tree, config), ids)
}

pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}
