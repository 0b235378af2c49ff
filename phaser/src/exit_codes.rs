//! Stable exit codes for phaser CLI commands.

/// Command succeeded; for `phaser run`, every phase completed.
pub const OK: i32 = 0;
/// Command failed due to an invalid scenario/config or other errors.
pub const INVALID: i32 = 1;
/// `phaser run` hit the global timeout.
pub const TIMED_OUT: i32 = 2;
/// `phaser run` was aborted by a fatal problem (bad jump, missing owner, ...).
pub const ABORTED: i32 = 3;
