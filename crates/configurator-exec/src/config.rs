//! Per-run configuration.

use std::time::Duration;

use configurator_core::{ConfiguratorKind, Settings, DEFAULT_MAX_OUTPUT_BYTES};
use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_REPORT_TAG;

/// Configuration for one directory run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root tag of the produced report.
    pub report_tag: String,

    /// Per-script timeout in seconds; 0 disables it.
    pub timeout_secs: u64,

    /// Upper bound on scripts running at the same time.
    pub max_concurrent: usize,

    /// Argument handed to every script.
    pub switches: Option<String>,

    /// Bytes kept per script output stream; 0 keeps everything.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl RunConfig {
    /// Limits taken from `settings`, default report tag.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            report_tag: DEFAULT_REPORT_TAG.to_string(),
            timeout_secs: settings.timeout_secs,
            max_concurrent: settings.max_concurrent,
            switches: None,
            max_output_bytes: settings.max_output_bytes,
        }
    }

    /// Configuration for the scripts of `kind`.
    pub fn for_kind(kind: ConfiguratorKind, settings: &Settings) -> Self {
        Self::from_settings(settings).with_report_tag(kind.report_tag())
    }

    pub fn with_report_tag(mut self, tag: impl Into<String>) -> Self {
        self.report_tag = tag.into();
        self
    }

    pub fn with_switches(mut self, switches: impl Into<String>) -> Self {
        self.switches = Some(switches.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn output_limit(&self) -> Option<usize> {
        (self.max_output_bytes > 0).then_some(self.max_output_bytes)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}
