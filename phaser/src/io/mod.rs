//! File formats and rendering used by the CLI.

pub mod config;
pub mod report;
pub mod scenario;
