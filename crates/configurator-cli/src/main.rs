//! Configurator CLI
//!
//! The `configurator` command runs configuration scripts against the values
//! document and prints the aggregate XML report.
//!
//! ## Commands
//!
//! - `run`: Run the scripts of one or more configurator kinds
//! - `exec`: Run the scripts of a single directory
//! - `values`: Show the environment bindings derived from the values document
//! - `config`: Show, replace or apply the stored values document
//! - `tmpwatch`: List (and optionally delete) stale temporary files

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use configurator_core::{
    load_values, remove_files, ConfigStore, ConfiguratorKind, Document, FsConfigStore, Settings,
    StaleFileScan,
};
use configurator_exec::{
    ConfigApplier, ConfiguratorPipeline, ExternalApplier, ReportDocument, RunConfig,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "configurator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run configuration scripts and aggregate their reports", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    // Flags override the `CONFIGURATOR_*` variables read by `Settings::from_env`.

    /// Values document
    #[arg(long, global = true)]
    values: Option<PathBuf>,

    /// Root directory holding the per-kind script directories
    #[arg(long, global = true)]
    extensions: Option<PathBuf>,

    /// Per-script timeout in seconds (0 disables it)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Maximum number of scripts running at once
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Program used by `config apply`
    #[arg(long, global = true)]
    apply_bin: Option<PathBuf>,

    /// Bytes kept per script output stream (0 keeps everything)
    #[arg(long, global = true)]
    max_output_bytes: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripts of the given kinds (default: read, validate, discover)
    Run {
        /// Kinds to run
        kinds: Vec<ConfiguratorKind>,

        /// Argument passed to every script
        #[arg(long)]
        switches: Option<String>,
    },

    /// Run the scripts of a single directory
    Exec {
        /// Script directory
        #[arg(long)]
        dir: PathBuf,

        /// Root tag of the report
        #[arg(long, default_value = configurator_exec::DEFAULT_REPORT_TAG)]
        tag: String,

        /// Argument passed to every script
        #[arg(long)]
        switches: Option<String>,
    },

    /// Show the environment bindings derived from the values document
    Values {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Manage the stored values document
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List stale files in a directory
    Tmpwatch {
        /// Directory to scan
        dir: PathBuf,

        /// Only consider files starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Modification age threshold in days
        #[arg(long)]
        mtime: Option<u64>,

        /// Access age threshold in days
        #[arg(long)]
        atime: Option<u64>,

        /// Change age threshold in days
        #[arg(long)]
        ctime: Option<u64>,

        /// Delete the files found
        #[arg(long)]
        delete: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the stored values document
    Show,
    /// Replace the stored values document with the content of FILE
    Set {
        /// New values document
        file: PathBuf,
    },
    /// Apply the stored configuration with the apply program
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct TmpwatchOutput<'a> {
    dir: &'a Path,
    stale: &'a [PathBuf],
    removed: &'a [PathBuf],
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let settings = Settings::from_env().context("Invalid configurator settings")?;
        self.apply_overrides(settings)
    }

    fn apply_overrides(&self, mut settings: Settings) -> Result<Settings> {
        if let Some(values) = &self.values {
            settings.values_path = values.clone();
        }
        if let Some(extensions) = &self.extensions {
            settings.extension_root = extensions.clone();
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            anyhow::ensure!(max_concurrent > 0, "--max-concurrent must be at least 1");
            settings.max_concurrent = max_concurrent;
        }
        if let Some(apply_bin) = &self.apply_bin {
            settings.apply_binary = apply_bin.clone();
        }
        if let Some(max_output_bytes) = self.max_output_bytes {
            settings.max_output_bytes = max_output_bytes;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    configurator_core::init_tracing(cli.json, level);

    let settings = cli.settings()?;

    match cli.command {
        Commands::Run { kinds, switches } => cmd_run(&settings, &kinds, switches.as_deref()).await,
        Commands::Exec { dir, tag, switches } => {
            cmd_exec(&settings, &dir, &tag, switches.as_deref()).await
        }
        Commands::Values { format } => cmd_values(&settings, format),
        Commands::Config { action } => {
            let store = FsConfigStore::new(&settings.values_path);
            match action {
                ConfigAction::Show => cmd_config_show(&store),
                ConfigAction::Set { file } => cmd_config_set(&store, &file),
                ConfigAction::Apply => cmd_config_apply(&settings).await,
            }
        }
        Commands::Tmpwatch {
            dir,
            prefix,
            mtime,
            atime,
            ctime,
            delete,
            format,
        } => {
            let scan = StaleFileScan {
                dir,
                prefix,
                modified_days: mtime,
                accessed_days: atime,
                changed_days: ctime,
            };
            cmd_tmpwatch(&scan, delete, format)
        }
    }
}

/// Run several kinds and print the composite report
async fn cmd_run(
    settings: &Settings,
    kinds: &[ConfiguratorKind],
    switches: Option<&str>,
) -> Result<()> {
    let kinds = if kinds.is_empty() {
        ConfiguratorKind::DEFAULT.to_vec()
    } else {
        kinds.to_vec()
    };

    let composite = ConfiguratorPipeline::run_kinds(settings, &kinds, switches)
        .await
        .context("Configurator run failed")?;

    let mut stdout = std::io::stdout().lock();
    composite.write(&mut stdout).context("Failed to write report")?;
    writeln!(stdout)?;

    for report in composite.reports() {
        print_summary(report);
    }
    eprintln!(
        "Summary: {}/{} scripts reported successfully",
        composite.script_count() - composite.failed_count(),
        composite.script_count()
    );
    Ok(())
}

/// Run one directory and print its report
async fn cmd_exec(
    settings: &Settings,
    dir: &Path,
    tag: &str,
    switches: Option<&str>,
) -> Result<()> {
    let mut config = RunConfig::from_settings(settings).with_report_tag(tag);
    if let Some(switches) = switches {
        config = config.with_switches(switches);
    }

    let report = ConfiguratorPipeline::run(dir, &settings.values_path, &config)
        .await
        .with_context(|| format!("Failed to run scripts in {}", dir.display()))?;

    let mut stdout = std::io::stdout().lock();
    report.write(&mut stdout).context("Failed to write report")?;
    writeln!(stdout)?;

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &ReportDocument) {
    eprintln!("{}:", report.root_tag());
    for entry in report.entries() {
        let status = if entry.is_synthesized() { "✗" } else { "✓" };
        eprintln!("  {} {}", status, entry.script);
    }
}

/// Print the bindings of the values document
fn cmd_values(settings: &Settings, format: OutputFormat) -> Result<()> {
    let values = load_values(&settings.values_path).with_context(|| {
        format!("Failed to load values from {}", settings.values_path.display())
    })?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&values)?),
        OutputFormat::Text => {
            for (key, value) in &values {
                match value {
                    Some(value) => println!("{key}={value}"),
                    None => println!("# {key} is unset"),
                }
            }
        }
    }
    Ok(())
}

/// Print the stored values document
fn cmd_config_show(store: &dyn ConfigStore) -> Result<()> {
    match store.value()? {
        Some(value) => print!("{value}"),
        None => eprintln!("No configuration stored at {}", store.location().display()),
    }
    Ok(())
}

/// Replace the stored values document
fn cmd_config_set(store: &dyn ConfigStore, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Document::parse(content.as_str())
        .with_context(|| format!("{} is not a well-formed values document", file.display()))?;

    store.set_value(&content)?;
    info!(path = %store.location().display(), "configuration stored");
    println!("Stored configuration at {}", store.location().display());
    Ok(())
}

/// Apply the stored configuration
async fn cmd_config_apply(settings: &Settings) -> Result<()> {
    let applier = ExternalApplier::new(&settings.apply_binary).with_timeout(settings.timeout());
    let outcome = applier.apply().await;

    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    anyhow::ensure!(
        outcome.succeeded(),
        "{} exited with code {}",
        settings.apply_binary.display(),
        outcome.return_code
    );
    Ok(())
}

/// List, and with `delete` remove, stale files
fn cmd_tmpwatch(scan: &StaleFileScan, delete: bool, format: OutputFormat) -> Result<()> {
    let stale = scan
        .scan()
        .with_context(|| format!("Failed to scan {}", scan.dir.display()))?;
    let removed = if delete { remove_files(&stale) } else { Vec::new() };

    match format {
        OutputFormat::Json => {
            let output = TmpwatchOutput {
                dir: &scan.dir,
                stale: &stale,
                removed: &removed,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for path in &stale {
                let mark = if removed.contains(path) { "removed" } else { "stale" };
                println!("{mark}\t{}", path.display());
            }
        }
    }
    Ok(())
}
