//! Development-time tracing for debugging phase runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the run product.
//!
//! - **Run reports (`io/report`)**: The transition log and diagnostics printed
//!   by `phaser run`. Always produced, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset and `--verbose` is not given.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Directive used for `--verbose`: run start/end, jumps and traced phases.
pub const VERBOSE_DIRECTIVE: &str = "warn,phaser=info";

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Falls back to `default_directive` if unset.
/// Output: stderr, compact format, no timestamps (run times are virtual and
/// carried as `at_ms` fields).
///
/// # Example
/// ```bash
/// RUST_LOG=phaser=debug phaser run scenario.toml
/// ```
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .compact(),
        )
        .init();
}
