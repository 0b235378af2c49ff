//! Shared deterministic types for the phase graph and objection accounting.
//!
//! These types define stable contracts between core and runtime. They carry no
//! references into the arenas; every cross-link is a plain index.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a node in the [`PhaseGraph`](crate::core::graph::PhaseGraph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Index of a component in the [`ComponentTree`](crate::tree::ComponentTree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) usize);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Index of a phase implementation registered with the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImpId(pub(crate) usize);

/// Lifecycle state of a phase node.
///
/// The declaration order is the progression order; `Jumping` sorts last so
/// that `state >= ReadyToEnd` style checks never treat a jumping node as
/// finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Uninitialized,
    Dormant,
    Scheduled,
    Syncing,
    Started,
    Executing,
    ReadyToEnd,
    Ended,
    Cleanup,
    Done,
    Jumping,
}

impl PhaseState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Dormant => "dormant",
            Self::Scheduled => "scheduled",
            Self::Syncing => "syncing",
            Self::Started => "started",
            Self::Executing => "executing",
            Self::ReadyToEnd => "ready_to_end",
            Self::Ended => "ended",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
            Self::Jumping => "jumping",
        }
    }

    /// True once the node has passed the sync barrier and not been reset.
    pub fn has_synced(self) -> bool {
        self >= Self::Syncing && self != Self::Jumping
    }

    /// True for `ReadyToEnd`, `Ended`, `Cleanup` and `Done`.
    pub fn is_ready_to_end_or_later(self) -> bool {
        matches!(
            self,
            Self::ReadyToEnd | Self::Ended | Self::Cleanup | Self::Done
        )
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural role of a node.
///
/// Schedules and domains are represented by a begin node and an end node that
/// share the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Imp,
    Schedule,
    Domain,
}

/// Component visiting order for function phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionOrder {
    TopDown,
    BottomUp,
}

/// How a phase implementation runs against the component tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseBehavior {
    /// One synchronous call per component, in the given order.
    Function(FunctionOrder),
    /// One forked task per component; the node ends on objection quiescence.
    Task,
}

impl PhaseBehavior {
    pub fn is_task(self) -> bool {
        matches!(self, Self::Task)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Function(FunctionOrder::TopDown) => "top-down",
            Self::Function(FunctionOrder::BottomUp) => "bottom-up",
            Self::Task => "task",
        }
    }
}

/// A phase implementation: the named behaviour shared by every node that
/// executes it (e.g. every domain's `main` node refers to the same imp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseImp {
    pub name: String,
    pub behavior: PhaseBehavior,
}
