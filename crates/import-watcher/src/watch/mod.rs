//! One detection cycle over the import folder.

pub mod outcome;
pub mod probe;
pub mod remediate;
pub mod scanner;
pub mod stall;

use std::fs;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::WatcherConfig;
use crate::notify::Notifier;

pub use outcome::StallOutcome;
pub use probe::{ServiceProbe, SystemServiceProbe};
pub use remediate::Remediator;
pub use scanner::{DirectoryScanner, PendingFile, ScanError, ScanPolicy, WorkUnit};
pub use stall::{await_resolution_or_stall, PollResult, PollSettings};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("import folder not found: {0}")]
    ImportFolderMissing(PathBuf),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Scanner, stall detector, remediator and notifier wired for one run.
#[derive(Debug)]
pub struct ImportWatcher {
    scanner: DirectoryScanner,
    policy: ScanPolicy,
    poll: PollSettings,
    remediator: Remediator,
    notifier: Box<dyn Notifier>,
}

impl ImportWatcher {
    pub fn new(
        config: &WatcherConfig,
        probe: Box<dyn ServiceProbe>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            scanner: DirectoryScanner::new(&config.paths.import_dir, &config.pending_extension)
                .excluding(&config.paths.old_dir),
            policy: config.scan.policy,
            poll: config.scan.poll,
            remediator: Remediator::new(probe, &config.service_name, &config.paths.old_dir),
            notifier,
        }
    }

    pub fn policy(&self) -> ScanPolicy {
        self.policy
    }

    /// Runs a single check: select, poll, remediate, notify.
    ///
    /// Only a missing or unlistable import folder is an error; every other
    /// condition is reported through the returned outcome.
    pub fn run(&self) -> Result<StallOutcome, WatchError> {
        self.ensure_layout()?;

        let selected = self
            .scanner
            .select_oldest_pending_file(self.policy)
            .map_err(|err| {
                error!(error = %err, "unable to scan import folder");
                err
            })?;

        let outcome = match selected {
            None => StallOutcome::NothingPending,
            Some(file) => {
                info!(
                    file = %file.path.display(),
                    modified = %file.modified,
                    policy = %self.policy,
                    "found oldest pending file"
                );
                match await_resolution_or_stall(&file.path, self.poll) {
                    PollResult::Resolved => StallOutcome::Resolved { file: file.path },
                    PollResult::StillPresent => self.remediator.remediate(&file),
                }
            }
        };

        if outcome.needs_alert() {
            self.notifier.notify(&outcome);
        }

        info!(%outcome, "watch run finished");
        Ok(outcome)
    }

    /// Candidate selection only; nothing is polled or moved.
    pub fn preview(&self) -> Result<Option<PendingFile>, WatchError> {
        self.ensure_import_dir()?;
        Ok(self.scanner.select_oldest_pending_file(self.policy)?)
    }

    fn ensure_layout(&self) -> Result<(), WatchError> {
        self.ensure_import_dir()?;
        // relocation re-creates the folder, so a failure here is not fatal
        if let Err(err) = fs::create_dir_all(self.remediator.old_dir()) {
            warn!(
                old_dir = %self.remediator.old_dir().display(),
                error = %err,
                "unable to create old folder"
            );
        }
        Ok(())
    }

    fn ensure_import_dir(&self) -> Result<(), WatchError> {
        let import_dir = self.scanner.import_dir();
        if import_dir.is_dir() {
            return Ok(());
        }
        error!(import_dir = %import_dir.display(), "import folder not found");
        Err(WatchError::ImportFolderMissing(import_dir.to_path_buf()))
    }
}
