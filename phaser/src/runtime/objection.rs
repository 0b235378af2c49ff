//! Raise, drop and drain handling on top of [`Objection`] accounting.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info};

use crate::component::ObjectionEvent;
use crate::core::objection::Objection;
use crate::core::types::{ComponentId, NodeId};
use crate::diagnostics::Severity;
use crate::error::PhaseError;
use crate::runtime::shared::{Hook, Shared};

impl Shared {
    fn trace_objection(&self, action: &str, node: NodeId, object: ComponentId, count: u32, total: u32) {
        let phase = self.label(node);
        let at_ms = self.now().as_millis() as u64;
        if self.config.trace_objections {
            info!(%phase, %object, count, total, at_ms, "objection {action}");
        } else {
            debug!(%phase, %object, count, total, at_ms, "objection {action}");
        }
    }

    /// `object` and, with propagation, its ancestors.
    fn notified(&self, object: ComponentId) -> Vec<ComponentId> {
        let mut out = vec![object];
        if self.config.propagate_objections {
            out.extend(self.tree.borrow().ancestors(object));
        }
        out
    }

    fn event(
        &self,
        node: NodeId,
        object: ComponentId,
        description: &str,
        count: u32,
        total: u32,
    ) -> ObjectionEvent {
        ObjectionEvent {
            phase: self.label(node),
            object,
            source: object,
            description: description.to_string(),
            count,
            total,
            time: self.now(),
        }
    }

    /// Raises `count` objections held by `object` against `node`.
    ///
    /// An `object` that is not part of the component tree has no owner to
    /// bill; that is fatal for the run.
    pub(crate) fn raise_objection(
        self: &Rc<Self>,
        node: NodeId,
        object: ComponentId,
        description: &str,
        count: u32,
    ) -> Result<(), PhaseError> {
        if !self.tree.borrow().contains(object) {
            self.fail(
                "objection-no-owner",
                Some(node),
                format!("objection raised for unknown {object}"),
            );
            return Err(PhaseError::UnknownComponent(object));
        }
        if count == 0 {
            return Ok(());
        }
        let total = {
            let mut graph = self.graph.borrow_mut();
            let objection = graph.node_mut(node).objection.get_or_insert_with(Objection::new);
            objection.raise(object, count);
            objection.total()
        };
        if let Some(pending) = self.drains.borrow_mut().remove(&node) {
            debug!(phase = %self.label(node), "drain cancelled by re-raise");
            pending.abort();
        }
        self.trace_objection("raised", node, object, count, total);
        self.bump();

        let event = self.event(node, object, description, count, total);
        for recipient in self.notified(object) {
            self.notify(
                recipient,
                Hook::Raised(ObjectionEvent {
                    object: recipient,
                    ..event.clone()
                }),
            );
        }
        Ok(())
    }

    /// Drops `count` objections held by `object` against `node`.
    ///
    /// Dropping more than was raised is reported and clamped. When the node's
    /// total reaches zero a drain monitor is started.
    pub(crate) fn drop_objection(
        self: &Rc<Self>,
        node: NodeId,
        object: ComponentId,
        description: &str,
        count: u32,
    ) {
        if !self.tree.borrow().contains(object) {
            self.report(
                Severity::Warning,
                "objection-no-owner",
                Some(node),
                format!("objection dropped for unknown {object}"),
            );
            return;
        }
        let outcome = {
            let mut graph = self.graph.borrow_mut();
            graph.node_mut(node).objection.as_mut().map(|objection| {
                let outcome = objection.drop(object, count);
                (outcome, objection.total())
            })
        };
        let Some((outcome, total)) = outcome else {
            self.report(
                Severity::Warning,
                "objection-underflow",
                Some(node),
                format!("{object} dropped {count} objection(s) that were never raised"),
            );
            return;
        };
        if outcome.excess > 0 {
            self.report(
                Severity::Warning,
                "objection-underflow",
                Some(node),
                format!(
                    "{object} dropped {count} objection(s) but held {}; clamped",
                    outcome.dropped
                ),
            );
        }
        if outcome.dropped == 0 {
            return;
        }
        self.trace_objection("dropped", node, object, outcome.dropped, total);
        self.bump();

        let event = self.event(node, object, description, outcome.dropped, total);
        for recipient in self.notified(object) {
            self.notify(
                recipient,
                Hook::Dropped(ObjectionEvent {
                    object: recipient,
                    ..event.clone()
                }),
            );
        }
        if outcome.reached_zero {
            self.start_drain(node, event);
        }
    }

    fn start_drain(self: &Rc<Self>, node: NodeId, trigger: ObjectionEvent) {
        let drain = self
            .graph
            .borrow()
            .node(node)
            .objection()
            .map_or(Duration::ZERO, |o| {
                o.drain_time(trigger.source, self.config.default_drain())
            });
        let shared = Rc::clone(self);
        let monitor = tokio::task::spawn_local(async move {
            tokio::time::sleep(drain).await;
            shared.finish_drain(node, &trigger);
        });
        if let Some(stale) = self
            .drains
            .borrow_mut()
            .insert(node, monitor.abort_handle())
        {
            stale.abort();
        }
    }

    fn finish_drain(&self, node: NodeId, trigger: &ObjectionEvent) {
        self.drains.borrow_mut().remove(&node);
        let raisers = {
            let mut graph = self.graph.borrow_mut();
            let Some(objection) = graph.node_mut(node).objection.as_mut() else {
                return;
            };
            if objection.total() != 0 || objection.all_dropped() {
                return;
            }
            objection.mark_all_dropped();
            objection.raisers().iter().copied().collect::<Vec<_>>()
        };
        self.trace_objection("all dropped", node, trigger.source, 0, 0);
        self.bump();
        for raiser in raisers {
            self.notify(
                raiser,
                Hook::AllDropped(ObjectionEvent {
                    object: raiser,
                    total: 0,
                    time: self.now(),
                    ..trigger.clone()
                }),
            );
        }
    }

    pub(crate) fn set_drain_time(&self, node: NodeId, object: ComponentId, drain: Duration) {
        self.graph
            .borrow_mut()
            .node_mut(node)
            .objection
            .get_or_insert_with(Objection::new)
            .set_drain_time(object, drain);
    }

    pub(crate) fn objection_total(&self, node: NodeId, object: ComponentId) -> u32 {
        let graph = self.graph.borrow();
        let tree = self.tree.borrow();
        graph.node(node).objection().map_or(0, |o| {
            o.total_for(object, &tree, self.config.propagate_objections)
        })
    }

    pub(crate) fn objection_count(&self, node: NodeId, object: ComponentId) -> u32 {
        self.graph
            .borrow()
            .node(node)
            .objection()
            .map_or(0, |o| o.count(object))
    }

    /// Drops the node's objection entirely, cancelling any pending drain.
    pub(crate) fn clear_objection(&self, node: NodeId) {
        if let Some(pending) = self.drains.borrow_mut().remove(&node) {
            pending.abort();
        }
        let outstanding = self
            .graph
            .borrow_mut()
            .node_mut(node)
            .objection
            .take()
            .map_or(0, |mut o| o.clear());
        if outstanding > 0 {
            self.report(
                Severity::Warning,
                "objection-cleared",
                Some(node),
                format!("{outstanding} outstanding objection(s) cleared"),
            );
        }
    }

    /// Empties the objection so the phase may end, keeping drain settings.
    pub(crate) fn end_prematurely(self: &Rc<Self>, node: NodeId, source: ComponentId) {
        let cleared = {
            let mut graph = self.graph.borrow_mut();
            graph
                .node_mut(node)
                .objection
                .as_mut()
                .map(|objection| (objection.clear(), objection.ever_raised()))
        };
        if let Some((outstanding, true)) = cleared {
            self.report(
                Severity::Info,
                "phase-ended-prematurely",
                Some(node),
                format!("{outstanding} outstanding objection(s) cleared"),
            );
            self.bump();
            let trigger = self.event(node, source, "end_prematurely", outstanding, 0);
            self.start_drain(node, trigger);
        }
    }

    pub(crate) fn render_objections(&self, node: NodeId) -> String {
        let graph = self.graph.borrow();
        let tree = self.tree.borrow();
        graph.node(node).objection().map_or_else(
            || "no objections\n".to_string(),
            |o| o.render(&tree, self.config.propagate_objections),
        )
    }
}
