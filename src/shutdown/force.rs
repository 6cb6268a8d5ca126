//! Forced termination of sessions still connected at the drain deadline.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::session::SessionRegistry;

/// Tally of a forced termination pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceReport {
    pub closed: usize,
    pub failed: usize,
}

impl ForceReport {
    pub fn total(&self) -> usize {
        self.closed + self.failed
    }
}

/// Take every remaining session out of the registry and force-close it.
///
/// The registry is emptied in one atomic step before any handle is touched,
/// so each handle is closed at most once and a disconnect racing this call
/// finds nothing to remove. A failing (or panicking) handle is logged and
/// counted; the remaining sessions are still closed.
pub fn force_terminate_all(registry: &SessionRegistry) -> ForceReport {
    let sessions = registry.drain_all();
    let mut report = ForceReport::default();

    for session in sessions {
        let result = catch_unwind(AssertUnwindSafe(|| session.handle.force_close()));
        match result {
            Ok(Ok(())) => {
                report.closed += 1;
                tracing::debug!(session = %session.id, "force-closed session");
            }
            Ok(Err(e)) => {
                report.failed += 1;
                tracing::warn!(session = %session.id, error = %e, "failed to force-close session");
            }
            Err(_) => {
                report.failed += 1;
                tracing::error!(session = %session.id, "close handle panicked during force-close");
            }
        }
    }

    report
}
