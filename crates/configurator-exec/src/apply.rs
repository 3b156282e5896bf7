//! Applying a stored configuration through an external program.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{error, info, instrument};

/// Return code reported when the apply program could not be started.
pub const SPAWN_FAILURE_CODE: i32 = 1024;

/// Result of one apply invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ApplyOutcome {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }

    fn failure(message: String) -> Self {
        Self {
            return_code: SPAWN_FAILURE_CODE,
            stdout: String::new(),
            stderr: message,
        }
    }
}

/// Pushes the stored configuration onto the system.
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Never fails; problems are reported through the outcome.
    async fn apply(&self) -> ApplyOutcome;
}

/// Applier invoking `<binary> write`.
#[derive(Debug, Clone)]
pub struct ExternalApplier {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl ExternalApplier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }
}

#[async_trait]
impl ConfigApplier for ExternalApplier {
    #[instrument(skip_all, fields(binary = %self.binary.display()))]
    async fn apply(&self) -> ApplyOutcome {
        info!("applying configuration");

        let child = Command::new(&self.binary)
            .arg("write")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "failed to start apply program");
                return ApplyOutcome::failure(format!(
                    "failed to launch {}: {e}",
                    self.binary.display()
                ));
            }
        };

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    error!(timeout = ?limit, "apply program timed out");
                    return ApplyOutcome::failure(format!(
                        "apply program timed out after {limit:?} and was killed"
                    ));
                }
            },
            None => child.wait_with_output().await,
        };

        let outcome = match output {
            Ok(output) => ApplyOutcome {
                return_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => ApplyOutcome::failure(format!("failed to wait for apply program: {e}")),
        };

        if outcome.succeeded() {
            info!("configuration applied");
        } else {
            error!(
                exit_code = outcome.return_code,
                stderr = %outcome.stderr.trim_end(),
                "apply program failed"
            );
        }
        outcome
    }
}
