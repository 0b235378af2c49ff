//! Typed errors for graph construction and run control.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::{ComponentId, NodeId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PhaseError {
    #[error("unknown phase node {0}")]
    UnknownNode(NodeId),

    #[error("no phase named '{name}' found from '{scope}'")]
    UnknownPhase { name: String, scope: String },

    #[error("'{0}' is not a schedule or domain")]
    NotASchedule(String),

    #[error("'{0}' is not a domain")]
    NotADomain(String),

    #[error("'{0}' is not a phase implementation node")]
    NotAnImp(String),

    #[error("anchor '{anchor}' is not part of schedule '{schedule}'")]
    AnchorNotInSchedule { anchor: String, schedule: String },

    #[error("'with' cannot be combined with 'after' or 'before'")]
    ConflictingPlacement,

    #[error("'{after}' is not before '{before}'")]
    InvalidPlacement { after: String, before: String },

    #[error("phase '{0}' is already defined with a different behavior")]
    ImpConflict(String),

    #[error("built-in phases are already registered")]
    AlreadyRegistered,

    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),

    #[error("component '{parent}' already has a child named '{name}'")]
    DuplicateComponent { parent: String, name: String },

    #[error("cannot jump from '{from}' to '{to}': no path between them")]
    UnreachableJump { from: String, to: String },

    #[error("timeout was locked at {current:?} and cannot be overridden")]
    TimeoutLocked { current: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start the executor: {0}")]
    Executor(String),
}
