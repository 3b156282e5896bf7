//! Stale temporary file detection.
//!
//! A scan lists files whose modification, access or change time is older than
//! a per-timestamp threshold in days. A threshold of 0 is disabled. Scanning
//! never deletes anything; callers decide whether to pass the result to
//! [`remove_files`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 86_400;

/// Age thresholds for one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleFileScan {
    pub dir: PathBuf,
    /// Only consider files whose name starts with this prefix.
    pub prefix: Option<String>,
    pub modified_days: Option<u64>,
    pub accessed_days: Option<u64>,
    pub changed_days: Option<u64>,
}

impl StaleFileScan {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn modified_before(mut self, days: u64) -> Self {
        self.modified_days = Some(days);
        self
    }

    pub fn accessed_before(mut self, days: u64) -> Self {
        self.accessed_days = Some(days);
        self
    }

    pub fn changed_before(mut self, days: u64) -> Self {
        self.changed_days = Some(days);
        self
    }

    /// Files that exceed any configured threshold, sorted by path.
    ///
    /// A missing directory yields an empty list.
    pub fn scan(&self) -> std::io::Result<Vec<PathBuf>> {
        self.scan_at(SystemTime::now())
    }

    /// Same as [`scan`](Self::scan) with an explicit notion of "now".
    pub fn scan_at(&self, now: SystemTime) -> std::io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut stale = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(prefix) = &self.prefix {
                if !name.to_string_lossy().starts_with(prefix.as_str()) {
                    continue;
                }
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            if self.is_stale(&metadata, now) {
                stale.push(entry.path());
            }
        }

        stale.sort();
        debug!(dir = %self.dir.display(), stale = stale.len(), "scanned for stale files");
        Ok(stale)
    }

    fn is_stale(&self, metadata: &std::fs::Metadata, now: SystemTime) -> bool {
        // Thresholds too large to represent never match.
        let older_than = |time: Option<SystemTime>, days: Option<u64>| match (time, days) {
            (Some(time), Some(days)) if days > 0 => days
                .checked_mul(SECS_PER_DAY)
                .and_then(|secs| now.checked_sub(Duration::from_secs(secs)))
                .is_some_and(|cutoff| time < cutoff),
            _ => false,
        };

        older_than(metadata.modified().ok(), self.modified_days)
            || older_than(metadata.accessed().ok(), self.accessed_days)
            || older_than(changed_time(metadata), self.changed_days)
    }
}

#[cfg(unix)]
fn changed_time(metadata: &std::fs::Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    let secs = u64::try_from(metadata.ctime()).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs))
}

#[cfg(not(unix))]
fn changed_time(_metadata: &std::fs::Metadata) -> Option<SystemTime> {
    None
}

/// Delete the given files, returning the ones actually removed.
///
/// Failures are logged and skipped.
pub fn remove_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in paths {
        match remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "removed stale file");
                removed.push(path.clone());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale file"),
        }
    }
    removed
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    if path.is_file() {
        std::fs::remove_file(path)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ))
    }
}
