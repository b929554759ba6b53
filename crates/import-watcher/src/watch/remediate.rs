use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::outcome::StallOutcome;
use super::probe::ServiceProbe;
use super::scanner::PendingFile;

/// Decides what to do with a confirmed stall.
#[derive(Debug)]
pub struct Remediator {
    probe: Box<dyn ServiceProbe>,
    service_name: String,
    old_dir: PathBuf,
}

impl Remediator {
    pub fn new(
        probe: Box<dyn ServiceProbe>,
        service_name: &str,
        old_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            probe,
            service_name: service_name.to_string(),
            old_dir: old_dir.into(),
        }
    }

    pub fn old_dir(&self) -> &Path {
        &self.old_dir
    }

    /// Escalates when the service is down, otherwise moves the file aside.
    /// The move is attempted exactly once.
    pub fn remediate(&self, file: &PendingFile) -> StallOutcome {
        warn!(
            file = %file.path.display(),
            service = %self.service_name,
            "file still present after poll window; checking service"
        );

        if !self.probe.is_running(&self.service_name) {
            warn!(service = %self.service_name, "service is not running");
            return StallOutcome::ServiceDown {
                file: file.path.clone(),
                service: self.service_name.clone(),
            };
        }

        match relocate(&file.path, &self.old_dir) {
            Ok(destination) => {
                info!(
                    file = %file.path.display(),
                    destination = %destination.display(),
                    "moved stuck file"
                );
                StallOutcome::Relocated {
                    file: file.path.clone(),
                    destination,
                }
            }
            Err(err) => {
                error!(file = %file.path.display(), error = %err, "failed to move file");
                StallOutcome::RelocationFailed {
                    file: file.path.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Moves `file` into `old_dir` keeping its base name, creating `old_dir`
/// first. An existing file of the same name is replaced.
pub fn relocate(file: &Path, old_dir: &Path) -> io::Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    fs::create_dir_all(old_dir)?;
    let destination = old_dir.join(name);

    match fs::rename(file, &destination) {
        Ok(()) => Ok(destination),
        Err(err) if is_cross_device(&err) => {
            warn!(
                file = %file.display(),
                destination = %destination.display(),
                "destination is on another volume; falling back to non-atomic copy and delete"
            );
            copy_then_remove(file, &destination)?;
            Ok(destination)
        }
        Err(err) => Err(err),
    }
}

fn copy_then_remove(source: &Path, destination: &Path) -> io::Result<()> {
    if let Err(err) = fs::copy(source, destination) {
        discard_partial_copy(destination);
        return Err(err);
    }
    if let Err(err) = fs::remove_file(source) {
        // leave a single copy behind rather than two
        discard_partial_copy(destination);
        return Err(err);
    }
    Ok(())
}

fn discard_partial_copy(destination: &Path) {
    match fs::remove_file(destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            destination = %destination.display(),
            error = %err,
            "unable to remove incomplete copy"
        ),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    const EXDEV: i32 = 18;
    err.raw_os_error() == Some(EXDEV)
}

#[cfg(windows)]
fn is_cross_device(err: &io::Error) -> bool {
    const ERROR_NOT_SAME_DEVICE: i32 = 17;
    err.raw_os_error() == Some(ERROR_NOT_SAME_DEVICE)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct CountingProbe {
        running: bool,
        calls: Arc<AtomicUsize>,
    }

    impl ServiceProbe for CountingProbe {
        fn is_running(&self, _service_name: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.running
        }
    }

    fn pending(path: PathBuf) -> PendingFile {
        PendingFile {
            path,
            modified: Utc::now(),
        }
    }

    fn stuck_file(tmp: &TempDir) -> PathBuf {
        let unit = tmp.path().join("Import").join("study");
        fs::create_dir_all(&unit).expect("create unit");
        let path = unit.join("slice-001.dcm");
        fs::write(&path, b"DICM").expect("write file");
        path
    }

    #[test]
    fn service_down_leaves_file_in_place() {
        let tmp = TempDir::new().expect("tempdir");
        let path = stuck_file(&tmp);
        let calls = Arc::new(AtomicUsize::new(0));
        let remediator = Remediator::new(
            Box::new(CountingProbe {
                running: false,
                calls: calls.clone(),
            }),
            "ImportSvc",
            tmp.path().join("Import_old"),
        );

        let outcome = remediator.remediate(&pending(path.clone()));

        assert_eq!(
            outcome,
            StallOutcome::ServiceDown {
                file: path.clone(),
                service: "ImportSvc".to_string()
            }
        );
        assert!(path.exists());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn running_service_moves_file_and_creates_old_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let path = stuck_file(&tmp);
        let old_dir = tmp.path().join("Import_old");
        let remediator = Remediator::new(
            Box::new(CountingProbe {
                running: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            "ImportSvc",
            &old_dir,
        );

        let outcome = remediator.remediate(&pending(path.clone()));

        let destination = old_dir.join("slice-001.dcm");
        assert_eq!(
            outcome,
            StallOutcome::Relocated {
                file: path.clone(),
                destination: destination.clone()
            }
        );
        assert!(!path.exists());
        assert_eq!(fs::read(&destination).expect("moved file"), b"DICM");
    }

    #[test]
    fn vanished_file_is_a_recoverable_failure() {
        let tmp = TempDir::new().expect("tempdir");
        let remediator = Remediator::new(
            Box::new(CountingProbe {
                running: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            "ImportSvc",
            tmp.path().join("Import_old"),
        );

        let outcome = remediator.remediate(&pending(tmp.path().join("gone.dcm")));
        assert!(matches!(outcome, StallOutcome::RelocationFailed { .. }));
    }

    #[test]
    fn copy_fallback_moves_content() {
        let tmp = TempDir::new().expect("tempdir");
        let source = tmp.path().join("a.dcm");
        let destination = tmp.path().join("b.dcm");
        fs::write(&source, b"DICM").expect("write file");

        copy_then_remove(&source, &destination).expect("copy fallback");

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).expect("copied"), b"DICM");
    }

    #[test]
    fn failed_copy_leaves_no_destination_behind() {
        let tmp = TempDir::new().expect("tempdir");
        let destination = tmp.path().join("b.dcm");

        let err = copy_then_remove(&tmp.path().join("missing.dcm"), &destination)
            .expect_err("copy of a missing file fails");

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!destination.exists());
    }

    #[cfg(unix)]
    #[test]
    #[traced_test]
    fn cross_volume_move_warns_about_non_atomic_fallback() {
        use std::os::unix::fs::MetadataExt;

        let shm = Path::new("/dev/shm");
        if !shm.is_dir() {
            return;
        }
        let Ok(source_dir) = TempDir::new_in(shm) else {
            return;
        };
        let target_dir = TempDir::new().expect("tempdir");
        let source_dev = fs::metadata(source_dir.path()).expect("stat source").dev();
        let target_dev = fs::metadata(target_dir.path()).expect("stat target").dev();
        if source_dev == target_dev {
            return;
        }

        let source = source_dir.path().join("a.dcm");
        fs::write(&source, b"DICM").expect("write file");
        let old_dir = target_dir.path().join("Import_old");

        let destination = relocate(&source, &old_dir).expect("relocated across volumes");

        assert_eq!(destination, old_dir.join("a.dcm"));
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).expect("copied"), b"DICM");
        assert!(logs_contain("non-atomic"));
    }

    #[test]
    fn relocate_is_idempotent_about_the_target_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let old_dir = tmp.path().join("old");
        fs::create_dir_all(&old_dir).expect("pre-create");
        let source = tmp.path().join("x.dcm");
        fs::write(&source, b"1").expect("write file");

        let destination = relocate(&source, &old_dir).expect("relocated");
        assert_eq!(destination, old_dir.join("x.dcm"));
    }
}
