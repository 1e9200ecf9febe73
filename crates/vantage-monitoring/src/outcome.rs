//! Result of a reconciliation pass and of each sync unit

use tracing::warn;
use vantage_common::crd::ReconcilePhase;

use crate::error::MonitoringError;

/// Phase reached by a pass plus the error that decided it, if any
///
/// Unlike a plain `Result`, a pass can finish in a phase and still carry an
/// error (a config write-back failure keeps the computed phase).
#[derive(Debug)]
pub struct PassOutcome {
    pub phase: ReconcilePhase,
    pub error: Option<MonitoringError>,
}

impl PassOutcome {
    pub fn completed() -> Self {
        Self {
            phase: ReconcilePhase::Completed,
            error: None,
        }
    }

    pub fn in_progress() -> Self {
        Self {
            phase: ReconcilePhase::InProgress,
            error: None,
        }
    }

    /// InProgress with a transient error attached
    pub fn in_progress_with(error: MonitoringError) -> Self {
        Self {
            phase: ReconcilePhase::InProgress,
            error: Some(error),
        }
    }

    /// Phase derived from the error's classification
    pub fn failed(error: MonitoringError) -> Self {
        Self {
            phase: error.phase(),
            error: Some(error),
        }
    }

    /// Attach an extra error without changing the phase
    ///
    /// The first error wins; a later one is logged and dropped.
    pub fn with_error(mut self, error: Option<MonitoringError>) -> Self {
        match (&self.error, error) {
            (None, Some(e)) => self.error = Some(e),
            (Some(kept), Some(dropped)) => {
                warn!(kept = %kept, dropped = %dropped, "pass already carries an error, dropping");
            }
            (_, None) => {}
        }
        self
    }

    pub fn is_completed(&self) -> bool {
        self.phase == ReconcilePhase::Completed && self.error.is_none()
    }

    /// Human-readable status line for the product status entry
    pub fn message(&self) -> String {
        match (&self.error, self.phase) {
            (Some(e), _) => e.to_string(),
            (None, ReconcilePhase::Completed) => "monitoring footprint converged".to_string(),
            (None, ReconcilePhase::InProgress) => "waiting for monitoring operator".to_string(),
            (None, ReconcilePhase::Failed) => "reconciliation failed".to_string(),
        }
    }

    /// Split into phase and a `Result` for callers that only care about errors
    pub fn into_result(self) -> (ReconcilePhase, Result<(), MonitoringError>) {
        match self.error {
            Some(e) => (self.phase, Err(e)),
            None => (self.phase, Ok(())),
        }
    }
}

/// Mutation counts from one sync unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl SyncReport {
    /// Number of mutating API calls this report accounts for
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created={} updated={} deleted={} unchanged={}",
            self.created, self.updated, self.deleted, self.unchanged
        )
    }
}
