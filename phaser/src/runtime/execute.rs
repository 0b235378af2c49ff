//! Per-node driver: runs one scheduled node from `Syncing` to `Done`.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::debug;

use crate::core::domain::BUILD_PHASE;
use crate::core::traversal::{hook_order, visit_order};
use crate::core::types::{NodeId, PhaseBehavior, PhaseKind, PhaseState};
use crate::diagnostics::Severity;
use crate::io::config::ReadyToEndOverflow;
use crate::runtime::handle::PhaseHandle;
use crate::runtime::shared::Shared;

/// How a driver finished; sent back to the hopper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeExit {
    Done(NodeId),
    Jumped { from: NodeId, target: NodeId },
    /// The driver reported a fatal problem; the hopper is already aborting.
    Halted(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hooks {
    Started,
    ReadyToEnd,
    Ended,
}

/// Result of one pass of the end-of-phase wait.
struct EndWait {
    waited: bool,
    jumped: bool,
}

pub(crate) async fn execute_node(shared: Rc<Shared>, node: NodeId) -> NodeExit {
    let (kind, behavior, syncs) = {
        let graph = shared.graph.borrow();
        let n = graph.node(node);
        (
            n.kind(),
            graph.imp_of(node).map(|imp| imp.behavior),
            n.syncs().clone(),
        )
    };

    let Some(behavior) = behavior.filter(|_| kind == PhaseKind::Imp) else {
        for state in [
            PhaseState::Started,
            PhaseState::Executing,
            PhaseState::ReadyToEnd,
            PhaseState::Ended,
        ] {
            shared.set_state(node, state);
        }
        return finish(&shared, node);
    };

    if !syncs.is_empty() {
        shared.set_state(node, PhaseState::Syncing);
        shared
            .wait_until(|s| {
                let graph = s.graph.borrow();
                syncs.iter().all(|p| graph.node(*p).state().has_synced())
            })
            .await;
    }

    shared.set_state(node, PhaseState::Started);
    call_hooks(&shared, node, Hooks::Started);
    shared.set_state(node, PhaseState::Executing);

    match behavior {
        PhaseBehavior::Function(_) => {
            run_functions(&shared, node);
            shared.set_state(node, PhaseState::ReadyToEnd);
            call_hooks(&shared, node, Hooks::ReadyToEnd);
        }
        PhaseBehavior::Task => {
            fork_tasks(&shared, node);
            settle().await;
            let partners: BTreeSet<NodeId> = {
                let graph = shared.graph.borrow();
                graph.siblings(node).union(&syncs).copied().collect()
            };
            if let Some(exit) = ready_to_end_loop(&shared, node, &partners).await {
                return exit;
            }
        }
    }

    if let Some(exit) = take_jump(&shared, node) {
        return exit;
    }

    shared.set_state(node, PhaseState::Ended);
    call_hooks(&shared, node, Hooks::Ended);
    if let Some(exit) = take_jump(&shared, node) {
        return exit;
    }
    finish(&shared, node)
}

/// Lets freshly forked tasks reach their first suspension point.
async fn settle() {
    tokio::task::yield_now().await;
}

fn run_functions(shared: &Rc<Shared>, node: NodeId) {
    let (visits, is_build) = {
        let graph = shared.graph.borrow();
        let tree = shared.tree.borrow();
        let is_build = graph.imp_of(node).is_some_and(|imp| imp.name == BUILD_PHASE);
        (visit_order(&graph, &tree, node), is_build)
    };
    for component in visits {
        if shared.fatal_reason().is_some() {
            return;
        }
        shared.tree.borrow_mut().set_current_phase(component, node);
        let handle = PhaseHandle::new(Rc::clone(shared), node, component);
        shared.with_component(component, |c| c.exec_function(&handle));
        if is_build {
            shared.tree.borrow_mut().mark_built(component);
        }
    }
}

fn fork_tasks(shared: &Rc<Shared>, node: NodeId) {
    let visits = {
        let graph = shared.graph.borrow();
        let tree = shared.tree.borrow();
        visit_order(&graph, &tree, node)
    };
    for component in visits {
        shared.tree.borrow_mut().set_current_phase(component, node);
        let handle = PhaseHandle::new(Rc::clone(shared), node, component);
        let Some(Some(task)) = shared.with_component(component, |c| c.exec_task(handle)) else {
            continue;
        };
        let join = tokio::task::spawn_local(task);
        shared.register_task(node, join.abort_handle());
    }
}

fn call_hooks(shared: &Rc<Shared>, node: NodeId, hooks: Hooks) {
    let order = {
        let graph = shared.graph.borrow();
        let tree = shared.tree.borrow();
        hook_order(&graph, &tree, node)
    };
    for component in order {
        let handle = PhaseHandle::new(Rc::clone(shared), node, component);
        shared.with_component(component, |c| match hooks {
            Hooks::Started => c.phase_started(&handle),
            Hooks::ReadyToEnd => c.phase_ready_to_end(&handle),
            Hooks::Ended => c.phase_ended(&handle),
        });
    }
}

/// Waits for quiescence, then runs `phase_ready_to_end` rounds until no round
/// re-raises an objection (bounded by configuration).
async fn ready_to_end_loop(
    shared: &Rc<Shared>,
    node: NodeId,
    partners: &BTreeSet<NodeId>,
) -> Option<NodeExit> {
    let first = wait_for_self_and_partners(shared, node, partners).await;
    if first.jumped {
        return take_jump(shared, node);
    }
    let limit = shared.config.max_ready_to_end_iterations;
    let mut rounds = 0;
    loop {
        rounds += 1;
        shared.set_state(node, PhaseState::ReadyToEnd);
        call_hooks(shared, node, Hooks::ReadyToEnd);
        settle().await;
        let pass = wait_for_self_and_partners(shared, node, partners).await;
        if pass.jumped {
            return take_jump(shared, node);
        }
        if !pass.waited {
            return None;
        }
        if rounds >= limit {
            let label = shared.label(node);
            match shared.config.ready_to_end_overflow {
                ReadyToEndOverflow::ForceEnd => {
                    shared.report(
                        Severity::Warning,
                        "ready-to-end-limit",
                        Some(node),
                        format!("{label} re-raised objections in {rounds} ready-to-end rounds; ending it"),
                    );
                    shared.clear_objection(node);
                    return None;
                }
                ReadyToEndOverflow::Fatal => {
                    shared.fail(
                        "ready-to-end-limit",
                        Some(node),
                        format!("{label} exceeded {limit} ready-to-end rounds"),
                    );
                    return Some(NodeExit::Halted(node));
                }
            }
        }
    }
}

/// Blocks until the node's own objection is quiescent and every partner is
/// ready to end with no outstanding objection.
///
/// While the node's own objection is active it sits in `Executing`; while it
/// only waits on partners it sits in `ReadyToEnd` so partners waiting on it
/// can make progress.
async fn wait_for_self_and_partners(
    shared: &Rc<Shared>,
    node: NodeId,
    partners: &BTreeSet<NodeId>,
) -> EndWait {
    enum Next {
        Jump,
        SelfBusy,
        PartnersBusy,
        Ready,
    }

    let mut epoch = shared.subscribe();
    let mut waited = false;
    loop {
        let next = {
            let graph = shared.graph.borrow();
            let this = graph.node(node);
            if this.jump_target().is_some() {
                Next::Jump
            } else if !this.is_quiescent() {
                Next::SelfBusy
            } else if partners.iter().all(|p| {
                let partner = graph.node(*p);
                partner.state().is_ready_to_end_or_later() && partner.is_quiescent()
            }) {
                Next::Ready
            } else {
                Next::PartnersBusy
            }
        };
        match next {
            Next::Jump => return EndWait { waited, jumped: true },
            Next::Ready => return EndWait { waited, jumped: false },
            Next::SelfBusy => {
                if shared.state(node) == PhaseState::ReadyToEnd {
                    shared.set_state(node, PhaseState::Executing);
                }
            }
            Next::PartnersBusy => {
                if shared.state(node) == PhaseState::Executing {
                    shared.set_state(node, PhaseState::ReadyToEnd);
                }
            }
        }
        waited = true;
        if epoch.changed().await.is_err() {
            return EndWait {
                waited,
                jumped: false,
            };
        }
    }
}

/// Consumes a pending jump request: the node goes to `Jumping`, its tasks
/// are cancelled and its objection is discarded.
fn take_jump(shared: &Rc<Shared>, node: NodeId) -> Option<NodeExit> {
    let target = shared.graph.borrow_mut().node_mut(node).jump_target.take()?;
    debug!(from = %shared.label(node), to = %shared.label(target), "jump taken");
    shared.set_state(node, PhaseState::Jumping);
    shared.kill_tasks(node);
    shared.clear_objection(node);
    Some(NodeExit::Jumped { from: node, target })
}

fn finish(shared: &Rc<Shared>, node: NodeId) -> NodeExit {
    shared.set_state(node, PhaseState::Cleanup);
    shared.kill_tasks(node);
    shared.clear_objection(node);
    shared.graph.borrow_mut().node_mut(node).run_count += 1;
    shared.set_state(node, PhaseState::Done);
    NodeExit::Done(node)
}
