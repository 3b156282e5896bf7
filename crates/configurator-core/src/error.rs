//! Error taxonomy for the configurator core.

use std::path::PathBuf;

/// Errors produced while reading or writing XML markup.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("malformed markup at byte {position}: {message}")]
    Malformed { position: usize, message: String },

    #[error("failed to write markup: {0}")]
    Write(String),
}

/// Errors produced while loading the values document.
///
/// Both variants are fatal for a run: no script may execute with an
/// environment derived from a broken document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unable to read values document {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed values document {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: XmlError,
    },
}

impl ParseError {
    /// Path of the document that failed to load.
    pub fn path(&self) -> &std::path::Path {
        match self {
            ParseError::Unreadable { path, .. } | ParseError::Malformed { path, .. } => path,
        }
    }

    /// Byte offset of the parse failure, when the document was readable.
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::Malformed {
                source: XmlError::Malformed { position, .. },
                ..
            } => Some(*position),
            _ => None,
        }
    }
}

/// Errors produced by the configuration store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("configuration store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("unknown configurator kind: {0}")]
    UnknownKind(String),
}
