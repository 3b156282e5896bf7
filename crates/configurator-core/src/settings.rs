//! Runtime settings and configurator kinds.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

pub const ENV_VALUES: &str = "CONFIGURATOR_VALUES";
pub const ENV_EXTENSIONS: &str = "CONFIGURATOR_EXTENSIONS";
pub const ENV_TIMEOUT_SECS: &str = "CONFIGURATOR_TIMEOUT_SECS";
pub const ENV_MAX_CONCURRENT: &str = "CONFIGURATOR_MAX_CONCURRENT";
pub const ENV_APPLY_BIN: &str = "CONFIGURATOR_APPLY_BIN";
pub const ENV_MAX_OUTPUT_BYTES: &str = "CONFIGURATOR_MAX_OUTPUT_BYTES";

/// Bytes kept per script output stream unless configured otherwise.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// A family of configurator scripts sharing one directory and report tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfiguratorKind {
    Read,
    Validate,
    Discover,
    Write,
}

impl ConfiguratorKind {
    /// Kinds run when none are requested explicitly.
    pub const DEFAULT: [ConfiguratorKind; 3] = [
        ConfiguratorKind::Read,
        ConfiguratorKind::Validate,
        ConfiguratorKind::Discover,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConfiguratorKind::Read => "read",
            ConfiguratorKind::Validate => "validate",
            ConfiguratorKind::Discover => "discover",
            ConfiguratorKind::Write => "write",
        }
    }

    /// Sub-directory of the extension root holding this kind's scripts.
    pub fn directory_name(&self) -> &'static str {
        match self {
            ConfiguratorKind::Read => "read.d",
            ConfiguratorKind::Validate => "validate.d",
            ConfiguratorKind::Discover => "discover.d",
            ConfiguratorKind::Write => "write.d",
        }
    }

    /// Root tag of the report produced for this kind.
    pub fn report_tag(&self) -> &'static str {
        match self {
            ConfiguratorKind::Read => "read_reports",
            ConfiguratorKind::Validate => "validation_reports",
            ConfiguratorKind::Discover => "discovery_reports",
            ConfiguratorKind::Write => "write",
        }
    }
}

impl fmt::Display for ConfiguratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfiguratorKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(ConfiguratorKind::Read),
            "validate" => Ok(ConfiguratorKind::Validate),
            "discover" => Ok(ConfiguratorKind::Discover),
            "write" => Ok(ConfiguratorKind::Write),
            _ => Err(SettingsError::UnknownKind(s.to_string())),
        }
    }
}

/// Locations and limits for a configurator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub values_path: PathBuf,
    pub extension_root: PathBuf,
    /// Per-script timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub apply_binary: PathBuf,
    /// Bytes kept per script output stream; 0 keeps everything.
    pub max_output_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            values_path: PathBuf::from("/var/lib/configurator/values.xml"),
            extension_root: PathBuf::from("/usr/lib/configurator"),
            timeout_secs: 300,
            max_concurrent: 4,
            apply_binary: PathBuf::from("/usr/bin/configurator-apply"),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl Settings {
    /// Defaults overridden by `CONFIGURATOR_*` environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(path) = lookup(ENV_VALUES) {
            settings.values_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_EXTENSIONS) {
            settings.extension_root = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            settings.timeout_secs = parse_number(ENV_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            let limit: usize = parse_number(ENV_MAX_CONCURRENT, &raw)?;
            if limit == 0 {
                return Err(SettingsError::InvalidValue {
                    var: ENV_MAX_CONCURRENT.to_string(),
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
            settings.max_concurrent = limit;
        }
        if let Some(path) = lookup(ENV_APPLY_BIN) {
            settings.apply_binary = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_MAX_OUTPUT_BYTES) {
            settings.max_output_bytes = parse_number(ENV_MAX_OUTPUT_BYTES, &raw)?;
        }

        Ok(settings)
    }

    /// Directory holding the scripts of `kind`.
    pub fn kind_dir(&self, kind: ConfiguratorKind) -> PathBuf {
        self.extension_root.join(kind.directory_name())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

fn parse_number<T>(var: &str, raw: &str) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| SettingsError::InvalidValue {
            var: var.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
