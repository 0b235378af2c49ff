//! Testbench phase scheduler with objection-based quiescence.
//!
//! A run walks a DAG of phases across the component tree. Function phases
//! call every component once in a fixed order; task phases fork one task per
//! component and end only when their objection count drains to zero (or a
//! global virtual-time budget runs out). Domains run their own copies of the
//! runtime schedule, can be synchronized with each other, and nodes may jump
//! backward or forward through the graph.
//!
//! - **[`core`]**: Pure, deterministic logic (graph, domains, objection
//!   accounting, traversal order). No I/O, no async.
//! - **[`runtime`]**: The single-threaded executor side: node drivers, drain
//!   monitors, the phase handle and [`runtime::PhaseRunner`].
//! - **[`io`]**: Configuration, scenario files and report rendering.
//!
//! Orchestration modules ([`simulate`], [`validate`]) coordinate the three to
//! implement CLI commands.

pub mod component;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod runtime;
pub mod script;
pub mod simulate;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
pub mod validate;
