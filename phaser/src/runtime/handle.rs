//! Phase handle passed to component callbacks and forked tasks.

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::core::types::{ComponentId, NodeId, PhaseState};
use crate::diagnostics::Severity;
use crate::error::PhaseError;
use crate::runtime::shared::Shared;

/// A component's view of the phase node it is executing in.
///
/// Objection convenience methods bill the handle's own component unless the
/// `_for` variant names another one.
#[derive(Clone)]
pub struct PhaseHandle {
    shared: Rc<Shared>,
    node: NodeId,
    component: ComponentId,
}

impl PhaseHandle {
    pub(crate) fn new(shared: Rc<Shared>, node: NodeId, component: ComponentId) -> Self {
        Self {
            shared,
            node,
            component,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Phase name, e.g. `main`.
    pub fn name(&self) -> String {
        self.shared.graph.borrow().node(self.node).name().to_string()
    }

    /// Domain-qualified phase name, e.g. `uvm.main`.
    pub fn label(&self) -> String {
        self.shared.label(self.node)
    }

    pub fn domain_name(&self) -> String {
        self.shared.graph.borrow().domain_name(self.node)
    }

    pub fn component_name(&self) -> String {
        self.shared.tree.borrow().full_name(self.component)
    }

    pub fn state(&self) -> PhaseState {
        self.shared.state(self.node)
    }

    /// Completed executions of this node in the current run.
    pub fn run_count(&self) -> u32 {
        self.shared.graph.borrow().node(self.node).run_count()
    }

    /// Virtual time since the start of the run.
    pub fn now(&self) -> Duration {
        self.shared.now()
    }

    /// Suspends the calling task for `duration` of virtual time.
    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Suspends until `node` reaches `state` or any later state.
    pub async fn wait_for_state(&self, node: NodeId, state: PhaseState) {
        self.shared
            .wait_until(|s| s.graph.borrow().node(node).state() >= state)
            .await;
    }

    pub fn raise_objection(&self, description: &str) -> Result<(), PhaseError> {
        self.raise_objection_for(self.component, description, 1)
    }

    pub fn raise_objection_for(
        &self,
        object: ComponentId,
        description: &str,
        count: u32,
    ) -> Result<(), PhaseError> {
        self.shared
            .raise_objection(self.node, object, description, count)
    }

    pub fn drop_objection(&self, description: &str) {
        self.drop_objection_for(self.component, description, 1);
    }

    pub fn drop_objection_for(&self, object: ComponentId, description: &str, count: u32) {
        self.shared
            .drop_objection(self.node, object, description, count);
    }

    /// Drain time applied when a drop by `object` empties this phase's objection.
    pub fn set_drain_time(&self, object: ComponentId, drain: Duration) {
        self.shared.set_drain_time(self.node, object, drain);
    }

    /// Total as seen from `object` (the root sees every objection).
    pub fn objection_total(&self, object: ComponentId) -> u32 {
        self.shared.objection_total(self.node, object)
    }

    /// Count raised by `object` itself.
    pub fn objection_count(&self, object: ComponentId) -> u32 {
        self.shared.objection_count(self.node, object)
    }

    /// Text dump of this phase's objection counts per component.
    pub fn render_objections(&self) -> String {
        self.shared.render_objections(self.node)
    }

    /// Requests a jump to the phase named `target`, searched among this
    /// node's predecessors first and then its successors.
    ///
    /// An unknown or unreachable target is fatal for the run.
    pub fn jump(&self, target: &str) -> Result<NodeId, PhaseError> {
        let found = self.shared.graph.borrow().find(self.node, target, false);
        let Some(target_node) = found else {
            let err = PhaseError::UnknownPhase {
                name: target.to_string(),
                scope: self.label(),
            };
            self.shared
                .fail("phase-bad-jump", Some(self.node), err.to_string());
            return Err(err);
        };
        self.jump_to(target_node)
    }

    /// Requests a jump to a specific node.
    pub fn jump_to(&self, target: NodeId) -> Result<NodeId, PhaseError> {
        self.shared.request_jump(self.node, target)
    }

    /// Clears every outstanding objection so the phase can end.
    pub fn end_prematurely(&self) {
        self.shared.end_prematurely(self.node, self.component);
    }

    /// Replaces the global timeout; see [`PhaseRunner::set_timeout`](crate::runtime::PhaseRunner::set_timeout).
    pub fn set_timeout(&self, duration: Duration, overridable: bool) -> Result<(), PhaseError> {
        self.shared.set_timeout(duration, overridable)
    }

    /// Looks up a phase by name from this node, predecessors first.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.shared.graph.borrow().find(self.node, name, false)
    }

    /// Forks a task that is cancelled together with this phase's tasks.
    pub fn fork(&self, task: impl Future<Output = ()> + 'static) {
        let join = tokio::task::spawn_local(task);
        self.shared.register_task(self.node, join.abort_handle());
    }

    /// Reports an informational diagnostic against this phase.
    pub fn info(&self, id: &str, message: impl Into<String>) {
        self.shared
            .report(Severity::Info, id, Some(self.node), message.into());
    }
}
