//! Isolated execution of a single configurator script.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
pub use configurator_core::DEFAULT_MAX_OUTPUT_BYTES;
use configurator_core::Environment;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::catalog::RunnableScript;

/// Return code reported when a script could not be launched or was killed.
pub const LAUNCH_FAILURE_CODE: i32 = 70;

/// Outcome of running one script.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub script: RunnableScript,

    /// Captured stdout, lossily decoded.
    pub stdout: String,

    /// Captured stderr, lossily decoded.
    pub stderr: String,

    /// Exit code, or [`LAUNCH_FAILURE_CODE`] when the process never ran to
    /// completion.
    pub return_code: i32,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Whether the script exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }

    fn launch_failure(
        script: &RunnableScript,
        started_at: DateTime<Utc>,
        start: Instant,
        message: String,
    ) -> Self {
        Self {
            script: script.clone(),
            stdout: String::new(),
            stderr: message,
            return_code: LAUNCH_FAILURE_CODE,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Runs scripts as child processes.
///
/// [`run`](ScriptRunner::run) never fails: launch errors and timeouts become
/// an [`ExecutionResult`] carrying [`LAUNCH_FAILURE_CODE`].
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Option<Duration>,
    max_output_bytes: Option<usize>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ScriptRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            max_output_bytes: Some(DEFAULT_MAX_OUTPUT_BYTES),
        }
    }

    /// Bytes kept per stream; `None` keeps everything. Output past the limit
    /// is drained and dropped, and a note is appended to stderr.
    pub fn with_max_output_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Run `script` with exactly the variables of `env`.
    ///
    /// The process gets a null stdin, one positional argument and a fresh
    /// scratch working directory. The scratch directory is removed when the
    /// script succeeds and kept for inspection otherwise.
    #[instrument(skip_all, fields(script = %script.name))]
    pub async fn run(&self, script: &RunnableScript, env: &Environment) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let scratch = match tempfile::Builder::new()
            .prefix("configurator-")
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "failed to create scratch directory");
                return ExecutionResult::launch_failure(
                    script,
                    started_at,
                    start,
                    format!("failed to create scratch directory: {e}"),
                );
            }
        };

        let mut result = match self.execute(script, env, scratch.path(), started_at, start).await {
            Ok(result) => result,
            Err(message) => ExecutionResult::launch_failure(script, started_at, start, message),
        };
        result.duration_ms = start.elapsed().as_millis() as u64;

        if result.succeeded() {
            debug!(duration_ms = result.duration_ms, "script succeeded");
        } else {
            let kept = scratch.keep();
            warn!(
                exit_code = result.return_code,
                duration_ms = result.duration_ms,
                scratch = %kept.display(),
                "script failed; keeping scratch directory"
            );
        }
        result
    }

    async fn execute(
        &self,
        script: &RunnableScript,
        env: &Environment,
        scratch: &Path,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> Result<ExecutionResult, String> {
        let mut child = Command::new(&script.path)
            .arg(script.argument())
            .env_clear()
            .envs(env.iter())
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to launch {}: {e}", script.path.display()))?;

        let stdout_task = tokio::spawn(read_stream(child.stdout.take(), self.max_output_bytes));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take(), self.max_output_bytes));
        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();

        // Both streams are drained before the exit status is looked at.
        let completion = async {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            let status = child.wait().await;
            (stdout, stderr, status)
        };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, completion).await.ok(),
            None => Some(completion.await),
        };

        let Some((stdout, stderr, status)) = outcome else {
            stdout_abort.abort();
            stderr_abort.abort();
            let _ = child.start_kill();
            let limit = self.timeout.unwrap_or_default();
            warn!(timeout = ?limit, "script timed out");
            return Err(format!("script timed out after {limit:?} and was killed"));
        };

        let status = status.map_err(|e| format!("failed to wait for script: {e}"))?;
        let mut stderr_text = String::from_utf8_lossy(&stderr.bytes).into_owned();
        for (stream, captured) in [("stdout", &stdout), ("stderr", &stderr)] {
            if captured.is_truncated() {
                warn!(
                    stream,
                    kept = captured.bytes.len(),
                    produced = captured.total,
                    "script output truncated"
                );
                append_line(
                    &mut stderr_text,
                    &format!(
                        "{stream} truncated after {} bytes ({} bytes produced)",
                        captured.bytes.len(),
                        captured.total
                    ),
                );
            }
        }
        let stdout = String::from_utf8_lossy(&stdout.bytes).into_owned();
        let mut stderr = stderr_text;

        let return_code = match status.code() {
            Some(code) => code,
            None => {
                append_line(&mut stderr, &format!("terminated abnormally: {status}"));
                LAUNCH_FAILURE_CODE
            }
        };

        Ok(ExecutionResult {
            script: script.clone(),
            stdout,
            stderr,
            return_code,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Bytes kept from one output stream.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    /// Bytes the script actually wrote, kept or not.
    total: u64,
}

impl Captured {
    fn is_truncated(&self) -> bool {
        self.total > self.bytes.len() as u64
    }
}

/// Read a stream to its end, keeping at most `limit` bytes.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, limit: Option<usize>) -> Captured {
    let mut captured = Captured::default();
    let Some(mut h) = handle else {
        return captured;
    };

    match limit {
        Some(limit) => {
            let _ = (&mut h)
                .take(limit as u64)
                .read_to_end(&mut captured.bytes)
                .await;
            let dropped = tokio::io::copy(&mut h, &mut tokio::io::sink())
                .await
                .unwrap_or_default();
            captured.total = captured.bytes.len() as u64 + dropped;
        }
        None => {
            let _ = h.read_to_end(&mut captured.bytes).await;
            captured.total = captured.bytes.len() as u64;
        }
    }
    captured
}

fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
    text.push('\n');
}
