//! The narrow interface the scheduler consumes from testbench components.
//!
//! Every method has a no-op default so a component only implements the
//! phases and notifications it cares about. Function phases are plain calls;
//! task phases return a future that the runner forks and cancels when the
//! phase ends.

use std::time::Duration;

use futures::future::LocalBoxFuture;

use crate::core::types::ComponentId;
use crate::runtime::PhaseHandle;

/// Future forked for one component in a task phase.
pub type TaskFuture = LocalBoxFuture<'static, ()>;

/// Payload of the objection notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectionEvent {
    /// Label of the phase node owning the objection, e.g. `uvm.main`.
    pub phase: String,
    /// Object whose count changed (or, for `all_dropped`, the notified raiser).
    pub object: ComponentId,
    /// Object that originally raised or dropped.
    pub source: ComponentId,
    pub description: String,
    pub count: u32,
    /// Node-wide total after the change.
    pub total: u32,
    pub time: Duration,
}

pub trait Component {
    /// Called once per function phase (build, connect, ...), in the phase's
    /// traversal order. `phase.name()` tells which one.
    fn exec_function(&mut self, _phase: &PhaseHandle) {}

    /// Called once per task phase (run, main, ...). The returned future is
    /// forked and aborted when the phase ends.
    fn exec_task(&mut self, _phase: PhaseHandle) -> Option<TaskFuture> {
        None
    }

    fn phase_started(&mut self, _phase: &PhaseHandle) {}

    /// Last chance to raise an objection and keep a task phase alive.
    fn phase_ready_to_end(&mut self, _phase: &PhaseHandle) {}

    fn phase_ended(&mut self, _phase: &PhaseHandle) {}

    fn raised(&mut self, _event: &ObjectionEvent) {}

    fn dropped(&mut self, _event: &ObjectionEvent) {}

    fn all_dropped(&mut self, _event: &ObjectionEvent) {}

    /// Best-effort cleanup before a fatal end of the run; called bottom-up.
    fn pre_abort(&mut self) {}
}

/// Component with no behaviour; used for the default root and intermediate
/// hierarchy levels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inert;

impl Component for Inert {}
