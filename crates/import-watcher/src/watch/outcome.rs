use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Terminal result of one watcher run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StallOutcome {
    /// No work unit held a pending file.
    NothingPending,
    /// The watched file was consumed within the poll budget.
    Resolved { file: PathBuf },
    /// The file stalled and the consuming service is not running.
    ServiceDown { file: PathBuf, service: String },
    /// The file stalled while the service ran; it was moved aside.
    Relocated { file: PathBuf, destination: PathBuf },
    /// The file stalled but could not be moved. Nothing was changed.
    RelocationFailed { file: PathBuf, reason: String },
}

impl StallOutcome {
    /// Outcomes that operators are told about.
    pub fn needs_alert(&self) -> bool {
        matches!(
            self,
            StallOutcome::ServiceDown { .. } | StallOutcome::Relocated { .. }
        )
    }
}

impl fmt::Display for StallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StallOutcome::NothingPending => write!(f, "nothing pending"),
            StallOutcome::Resolved { file } => write!(f, "resolved: {}", file.display()),
            StallOutcome::ServiceDown { file, service } => write!(
                f,
                "service '{service}' not running; {} left in place",
                file.display()
            ),
            StallOutcome::Relocated { file, destination } => write!(
                f,
                "relocated {} to {}",
                file.display(),
                destination.display()
            ),
            StallOutcome::RelocationFailed { file, reason } => {
                write!(f, "unable to relocate {}: {reason}", file.display())
            }
        }
    }
}
