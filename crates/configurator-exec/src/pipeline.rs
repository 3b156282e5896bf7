//! Run orchestration.
//!
//! A run resolves the environment once, lists the script directory once,
//! executes every script with bounded concurrency and aggregates the results
//! in catalog order. Failures before the first script starts abort the run;
//! anything after that ends up in the report.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use configurator_core::{load_values, ConfiguratorKind, Environment, Settings};
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};

use crate::aggregate::{aggregate, CompositeReport, ReportDocument};
use crate::catalog::{discover, RunnableScript};
use crate::config::RunConfig;
use crate::error::Result;
use crate::runner::{ExecutionResult, ScriptRunner, LAUNCH_FAILURE_CODE};

/// Configurator run orchestrator.
pub struct ConfiguratorPipeline;

impl ConfiguratorPipeline {
    /// Run every script in `dir` against the bindings of the values document.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn run(dir: &Path, values_path: &Path, config: &RunConfig) -> Result<ReportDocument> {
        let env = Self::environment(values_path)?;
        Self::run_with_environment(dir, Arc::new(env), config).await
    }

    /// Like [`run`](Self::run), then write the report document to `out`.
    pub async fn run_to_writer<W: Write>(
        dir: &Path,
        values_path: &Path,
        config: &RunConfig,
        out: W,
    ) -> Result<ReportDocument> {
        let report = Self::run(dir, values_path, config).await?;
        report.write(out)?;
        Ok(report)
    }

    /// Run every script in `dir` with an already resolved environment.
    pub async fn run_with_environment(
        dir: &Path,
        env: Arc<Environment>,
        config: &RunConfig,
    ) -> Result<ReportDocument> {
        let scripts = Self::catalog(dir, config)?;
        Ok(Self::execute_catalog(scripts, env, config).await)
    }

    /// Run the directories of several kinds and wrap their reports.
    ///
    /// Every kind directory is listed before the first script starts, so a
    /// missing directory aborts the run without side effects.
    #[instrument(skip_all, fields(kinds = ?kinds))]
    pub async fn run_kinds(
        settings: &Settings,
        kinds: &[ConfiguratorKind],
        switches: Option<&str>,
    ) -> Result<CompositeReport> {
        let env = Arc::new(Self::environment(&settings.values_path)?);

        let mut planned = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let mut config = RunConfig::for_kind(kind, settings);
            if let Some(switches) = switches {
                config = config.with_switches(switches);
            }
            let scripts = Self::catalog(&settings.kind_dir(kind), &config)?;
            planned.push((config, scripts));
        }

        let mut reports = Vec::with_capacity(planned.len());
        for (config, scripts) in planned {
            info!(report = %config.report_tag, scripts = scripts.len(), "running configurator kind");
            reports.push(Self::execute_catalog(scripts, Arc::clone(&env), &config).await);
        }
        Ok(CompositeReport::new(reports))
    }

    fn environment(values_path: &Path) -> Result<Environment> {
        let values = load_values(values_path)?;
        Ok(Environment::from_ambient().with_values(&values))
    }

    fn catalog(dir: &Path, config: &RunConfig) -> Result<Vec<RunnableScript>> {
        let scripts = discover(dir)?;
        Ok(match &config.switches {
            Some(switches) => scripts
                .into_iter()
                .map(|s| s.with_switches(switches.as_str()))
                .collect(),
            None => scripts,
        })
    }

    async fn execute_catalog(
        scripts: Vec<RunnableScript>,
        env: Arc<Environment>,
        config: &RunConfig,
    ) -> ReportDocument {
        let start = Instant::now();
        info!(scripts = scripts.len(), "starting configurator run");

        let results = Self::execute_all(scripts, env, config).await;
        let report = aggregate(&config.report_tag, &results);

        info!(
            scripts = report.len(),
            failed = report.failed_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "configurator run finished"
        );
        report
    }

    /// Execute `scripts` with at most `config.max_concurrent` running at
    /// once. Results come back in the order of `scripts`.
    pub async fn execute_all(
        scripts: Vec<RunnableScript>,
        env: Arc<Environment>,
        config: &RunConfig,
    ) -> Vec<ExecutionResult> {
        let runner =
            ScriptRunner::new(config.timeout()).with_max_output_bytes(config.output_limit());
        let sem = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        let mut tasks = Vec::with_capacity(scripts.len());
        for (index, script) in scripts.iter().cloned().enumerate() {
            let runner = runner.clone();
            let env = Arc::clone(&env);
            let sem = Arc::clone(&sem);

            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                (index, runner.run(&script, &env).await)
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (index, joined) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            match joined {
                Ok(tagged) => results.push(tagged),
                Err(e) => {
                    error!(script = %scripts[index].name, error = %e, "script worker failed");
                    results.push((index, worker_failure(&scripts[index], &e)));
                }
            }
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

fn worker_failure(script: &RunnableScript, err: &tokio::task::JoinError) -> ExecutionResult {
    ExecutionResult {
        script: script.clone(),
        stdout: String::new(),
        stderr: format!("script worker failed: {err}"),
        return_code: LAUNCH_FAILURE_CODE,
        started_at: Utc::now(),
        duration_ms: 0,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn env() -> Arc<Environment> {
        Arc::new(Environment::from_vars([("PATH", "/usr/bin:/bin")]))
    }

    #[tokio::test]
    async fn test_execute_all_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "a", "sleep 0.3; echo '<a/>'");
        write_script(dir.path(), "b", "echo '<b/>'");
        write_script(dir.path(), "c", "sleep 0.1; echo '<c/>'");
        let scripts = discover(dir.path()).unwrap();

        let config = RunConfig::default().with_max_concurrent(3);
        let results = ConfiguratorPipeline::execute_all(scripts, env(), &config).await;
        let out: Vec<_> = results.iter().map(|r| r.stdout.trim()).collect();
        assert_eq!(out, vec!["<a/>", "<b/>", "<c/>"]);
    }

    #[tokio::test]
    async fn test_execute_all_empty_catalog() {
        let results =
            ConfiguratorPipeline::execute_all(Vec::new(), env(), &RunConfig::default()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_switches_reach_every_script() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "a", "echo \"<a>$1</a>\"");
        write_script(dir.path(), "b", "echo \"<b>$1</b>\"");

        let config = RunConfig::default().with_switches("full");
        let report = ConfiguratorPipeline::run_with_environment(dir.path(), env(), &config)
            .await
            .unwrap();
        assert_eq!(
            report.to_xml_string().unwrap(),
            "<reports><a>full</a><b>full</b></reports>"
        );
    }
}
