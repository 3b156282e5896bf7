//! Configurator execution pipeline
//!
//! Runs a directory of configuration scripts against the environment derived
//! from a values document:
//! - Discovers executable scripts in a fixed, sorted order
//! - Runs each one isolated, with a timeout and bounded concurrency
//! - Aggregates their output into one well-formed report

pub mod aggregate;
pub mod apply;
pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;

// Re-export key types
pub use aggregate::{
    aggregate, interpret, synthesize_error, CompositeReport, ReportContent, ReportDocument,
    ReportEntry, COMPOSITE_REPORT_TAG, DEFAULT_REPORT_TAG, ERROR_CODE, ERROR_MESSAGE,
};
pub use apply::{ApplyOutcome, ConfigApplier, ExternalApplier, SPAWN_FAILURE_CODE};
pub use catalog::{discover, RunnableScript};
pub use config::RunConfig;
pub use error::{CatalogError, PipelineError};
pub use pipeline::ConfiguratorPipeline;
pub use runner::{ExecutionResult, ScriptRunner, DEFAULT_MAX_OUTPUT_BYTES, LAUNCH_FAILURE_CODE};
