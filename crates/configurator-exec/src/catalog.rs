//! Script discovery.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::CatalogError;

/// One executable configurator script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnableScript {
    /// File name, used as the report entry name.
    pub name: String,

    /// Full path to the executable.
    pub path: PathBuf,

    /// Single positional argument passed to the script.
    pub switches: Option<String>,
}

impl RunnableScript {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            switches: None,
        }
    }

    pub fn with_switches(mut self, switches: impl Into<String>) -> Self {
        self.switches = Some(switches.into());
        self
    }

    /// The argument actually handed to the process; empty without switches.
    pub fn argument(&self) -> &str {
        self.switches.as_deref().unwrap_or("")
    }
}

/// List the executable regular files of `dir`, sorted by file name.
///
/// Symlinks are followed; entries that are not regular files or carry no
/// execute bit are skipped.
pub fn discover(dir: &Path) -> Result<Vec<RunnableScript>, CatalogError> {
    let entries = std::fs::read_dir(dir).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CatalogError::MissingDirectory {
                path: dir.to_path_buf(),
            }
        } else {
            CatalogError::Unreadable {
                path: dir.to_path_buf(),
                source,
            }
        }
    })?;

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CatalogError::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() || !is_executable(&metadata) {
            debug!(path = %path.display(), "skipping non-executable entry");
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        scripts.push(RunnableScript::new(name, path));
    }

    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    scripts.dedup_by(|a, b| a.name == b.name);
    debug!(dir = %dir.display(), count = scripts.len(), "discovered scripts");
    Ok(scripts)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}
