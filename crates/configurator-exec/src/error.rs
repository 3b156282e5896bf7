//! Fatal failures of a configurator run.
//!
//! Anything that goes wrong with an individual script is absorbed into the
//! report; only the errors below abort a run.

use std::path::PathBuf;

use configurator_core::{ParseError, XmlError};

/// Errors produced while listing a script directory.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("script directory {} does not exist", .path.display())]
    MissingDirectory { path: PathBuf },

    #[error("unable to read script directory {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            CatalogError::MissingDirectory { path } | CatalogError::Unreadable { path, .. } => path,
        }
    }
}

/// Errors that prevent a run from producing a report.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Values(#[from] ParseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to write report: {0}")]
    Report(#[from] XmlError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
