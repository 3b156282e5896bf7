//! Configuration store: the durable home of the values document.
//!
//! Writes go through a temporary file in the target directory followed by a
//! rename, so readers only ever see the old or the new document.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::StoreError;

/// Get/set access to a single configuration document.
pub trait ConfigStore: Send + Sync {
    /// Where the document lives, for logging.
    fn location(&self) -> &Path;

    /// Current content, or `None` when nothing has been stored yet.
    fn value(&self) -> Result<Option<String>, StoreError>;

    /// Replace the content durably and atomically.
    fn set_value(&self, value: &str) -> Result<(), StoreError>;
}

/// File-backed store.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    path: PathBuf,
}

impl FsConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for FsConfigStore {
    fn location(&self) -> &Path {
        &self.path
    }

    fn value(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn set_value(&self, value: &str) -> Result<(), StoreError> {
        info!(path = %self.path.display(), "setting configuration value");

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(value.as_bytes())
            .map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        restrict_permissions(tmp.path()).map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// In-memory store for tests.
#[derive(Debug)]
pub struct MemoryConfigStore {
    location: PathBuf,
    value: Mutex<Option<String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            location: PathBuf::from("memory://values.xml"),
            value: Mutex::new(None),
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn location(&self) -> &Path {
        &self.location
    }

    fn value(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn set_value(&self, value: &str) -> Result<(), StoreError> {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value.to_string());
        Ok(())
    }
}
