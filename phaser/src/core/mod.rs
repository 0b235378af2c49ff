//! Deterministic, pure logic shared by the phase runtime.
//!
//! Core modules must be free of I/O and async code. They operate on the
//! in-memory graph and component tree and return deterministic outputs
//! suitable for tests.

pub mod domain;
pub mod graph;
pub mod invariants;
pub mod objection;
pub mod traversal;
pub mod types;
