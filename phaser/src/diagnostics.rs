//! Diagnostic channel for recoverable and fatal run problems.
//!
//! Problems detected by the scheduler are never thrown across its own control
//! flow. They are recorded here with a severity and a stable id, and mirrored
//! to `tracing` at the matching level.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable identifier, e.g. `objection-underflow`.
    pub id: String,
    pub message: String,
    /// Virtual time of the report.
    pub time: Duration,
    /// Phase the report was raised against, when there is one.
    pub phase: Option<String>,
}

/// Shared, append-only diagnostic sink.
///
/// Clones share the same buffer; the graph, the runner and every phase handle
/// hold one.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Rc<RefCell<Vec<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        let phase = diagnostic.phase.as_deref().unwrap_or("-");
        let at_ms = diagnostic.time.as_millis() as u64;
        match diagnostic.severity {
            Severity::Info => info!(id = %diagnostic.id, phase, at_ms, "{}", diagnostic.message),
            Severity::Warning => {
                warn!(id = %diagnostic.id, phase, at_ms, "{}", diagnostic.message);
            }
            Severity::Error | Severity::Fatal => {
                error!(
                    id = %diagnostic.id,
                    severity = diagnostic.severity.as_str(),
                    phase,
                    at_ms,
                    "{}",
                    diagnostic.message
                );
            }
        }
        self.entries.borrow_mut().push(diagnostic);
    }

    /// Shorthand for a report with no phase attached.
    pub fn emit(&self, severity: Severity, id: &str, message: impl Into<String>, time: Duration) {
        self.report(Diagnostic {
            severity,
            id: id.to_string(),
            message: message.into(),
            time,
            phase: None,
        });
    }

    pub fn warn(&self, id: &str, message: impl Into<String>) {
        self.emit(Severity::Warning, id, message, Duration::ZERO);
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.borrow().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Number of reports carrying `id`.
    pub fn count_id(&self, id: &str) -> usize {
        self.entries.borrow().iter().filter(|d| d.id == id).count()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_buffer() {
        let diagnostics = Diagnostics::new();
        let other = diagnostics.clone();
        other.warn("first", "from the clone");
        diagnostics.emit(Severity::Fatal, "second", "from the original", Duration::from_secs(3));

        let entries = diagnostics.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "first");
        assert_eq!(entries[1].time, Duration::from_secs(3));
        assert_eq!(other.count(Severity::Fatal), 1);
        assert_eq!(other.count_id("first"), 1);
    }
}
