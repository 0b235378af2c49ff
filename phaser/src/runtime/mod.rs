//! Single-threaded cooperative execution of the phase graph.
//!
//! Everything here runs on one thread inside a tokio `LocalSet` with a paused,
//! auto-advancing clock. Pure decisions are delegated to [`crate::core`].

mod execute;
mod handle;
mod objection;
mod runner;
mod shared;

pub use handle::PhaseHandle;
pub use runner::{PhaseRunner, RunOutcome, RunReport};
pub use shared::Transition;
