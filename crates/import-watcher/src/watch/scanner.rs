//! Candidate selection over the import folder.
//!
//! A work unit is a direct subdirectory of the import folder; a pending file
//! is a regular file inside it whose extension matches (case-insensitively).
//! Listings are sorted by modification time with the path as tie-breaker so
//! repeated scans of the same tree agree.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ConfigError;

/// Directory the upstream pipeline parks rejected files in.
pub const INVALID_FILES_DIR: &str = "_invalidFiles";
const OLD_FOLDER_SUFFIX: &str = "_old";

/// How work units are walked when looking for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPolicy {
    /// Only the oldest work unit is inspected; an empty unit ends the scan.
    SingleOldest,
    /// Work units are inspected oldest-first until one yields a file.
    #[default]
    Exhaustive,
}

impl ScanPolicy {
    /// Poll budget used when none is configured.
    pub fn default_timeout(self) -> Duration {
        match self {
            ScanPolicy::SingleOldest => Duration::from_secs(30),
            ScanPolicy::Exhaustive => Duration::from_secs(60),
        }
    }
}

impl FromStr for ScanPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "single-oldest" => Ok(Self::SingleOldest),
            "exhaustive" => Ok(Self::Exhaustive),
            _ => Err(ConfigError::InvalidPolicy(value.to_string())),
        }
    }
}

impl fmt::Display for ScanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPolicy::SingleOldest => write!(f, "single-oldest"),
            ScanPolicy::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("unable to list {path}: {source}")]
    Listing { path: PathBuf, source: io::Error },
}

/// True for directories that must never be treated as a work unit.
pub fn is_quarantine_dir(name: &str) -> bool {
    name == INVALID_FILES_DIR || name.ends_with(OLD_FOLDER_SUFFIX)
}

/// Read-only view over the import folder.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    import_dir: PathBuf,
    extension: String,
    excluded: Vec<PathBuf>,
}

impl DirectoryScanner {
    pub fn new(import_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            import_dir: import_dir.into(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            excluded: Vec::new(),
        }
    }

    /// Never treats `dir` as a work unit, whatever its name. Used for the
    /// relocation target when it lives inside the import folder.
    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    pub fn import_dir(&self) -> &Path {
        &self.import_dir
    }

    /// All work units, oldest first.
    pub fn work_units(&self) -> Result<Vec<WorkUnit>, ScanError> {
        let mut units: Vec<WorkUnit> = list_entries(&self.import_dir)?
            .into_iter()
            .filter(|entry| entry.is_dir)
            .filter(|entry| !is_quarantine_dir(&entry.name))
            .filter(|entry| !self.excluded.iter().any(|dir| *dir == entry.path))
            .map(|entry| WorkUnit {
                path: entry.path,
                modified: entry.modified,
            })
            .collect();

        units.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(units)
    }

    /// Oldest matching file directly inside `unit`.
    pub fn oldest_pending_file(&self, unit: &WorkUnit) -> Result<Option<PendingFile>, ScanError> {
        let oldest = list_entries(&unit.path)?
            .into_iter()
            .filter(|entry| !entry.is_dir && self.matches_extension(&entry.name))
            .map(|entry| PendingFile {
                path: entry.path,
                modified: entry.modified,
            })
            .min_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(oldest)
    }

    /// Picks the file to watch according to `policy`.
    pub fn select_oldest_pending_file(
        &self,
        policy: ScanPolicy,
    ) -> Result<Option<PendingFile>, ScanError> {
        let units = self.work_units()?;
        self.select_from_units(&units, policy)
    }

    /// Candidate selection over an already listed, oldest-first set of units.
    /// Units that vanish or become unreadable after listing are skipped.
    pub fn select_from_units(
        &self,
        units: &[WorkUnit],
        policy: ScanPolicy,
    ) -> Result<Option<PendingFile>, ScanError> {
        if units.is_empty() {
            info!(import_dir = %self.import_dir.display(), "no work units found");
            return Ok(None);
        }

        match policy {
            ScanPolicy::SingleOldest => {
                let unit = &units[0];
                match self.oldest_pending_file(unit) {
                    Ok(Some(file)) => Ok(Some(file)),
                    Ok(None) => {
                        info!(
                            unit = %unit.path.display(),
                            "oldest work unit holds no pending files"
                        );
                        Ok(None)
                    }
                    Err(err) => {
                        warn!(error = %err, "oldest work unit unreadable, nothing to watch");
                        Ok(None)
                    }
                }
            }
            ScanPolicy::Exhaustive => {
                for unit in units {
                    match self.oldest_pending_file(unit) {
                        Ok(Some(file)) => return Ok(Some(file)),
                        Ok(None) => {
                            info!(unit = %unit.path.display(), "no pending files, skipping");
                        }
                        Err(err) => {
                            warn!(error = %err, "work unit unreadable, skipping");
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    fn matches_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

struct ListedEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    modified: DateTime<Utc>,
}

fn list_entries(dir: &Path) -> Result<Vec<ListedEntry>, ScanError> {
    let listing = fs::read_dir(dir).map_err(|source| ScanError::Listing {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for entry in listing {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        // Entries can vanish between listing and stat while the pipeline drains.
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping entry without metadata");
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(time) => DateTime::<Utc>::from(time),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping entry without mtime");
                continue;
            }
        };
        if !metadata.is_dir() && !metadata.is_file() {
            continue;
        }

        entries.push(ListedEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            is_dir: metadata.is_dir(),
            modified,
        });
    }
    Ok(entries)
}
