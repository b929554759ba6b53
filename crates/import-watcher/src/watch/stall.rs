use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

/// Budget and tick for the existence poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The file disappeared within the budget.
    Resolved,
    /// The file still existed when the budget ran out.
    StillPresent,
}

/// Blocks until `file` disappears or `settings.timeout` elapses.
///
/// `StillPresent` is only returned once the full budget has passed, and each
/// sleep is clamped to the remaining budget so the call never overshoots by
/// more than one interval.
pub fn await_resolution_or_stall(file: &Path, settings: PollSettings) -> PollResult {
    let started = Instant::now();
    let interval = settings.interval.max(Duration::from_millis(1));

    info!(
        file = %file.display(),
        timeout_secs = settings.timeout.as_secs_f64(),
        "waiting for the pipeline to consume file"
    );

    loop {
        if !still_present(file) {
            info!(
                file = %file.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "file was processed or moved"
            );
            return PollResult::Resolved;
        }

        let elapsed = started.elapsed();
        if elapsed >= settings.timeout {
            return PollResult::StillPresent;
        }

        thread::sleep(interval.min(settings.timeout - elapsed));
    }
}

fn still_present(file: &Path) -> bool {
    match file.try_exists() {
        Ok(exists) => exists,
        Err(err) => {
            debug!(
                file = %file.display(),
                error = %err,
                "existence check failed; assuming present"
            );
            true
        }
    }
}
