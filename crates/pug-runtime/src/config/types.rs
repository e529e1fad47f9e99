//! Configuration types.

use super::{detect_plugin_cache, ConfigError};
use crate::logging::DEFAULT_MAX_RECORDS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration.
///
/// Every field has a default, so a config file only needs the fields
/// it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PugConfig {
    /// Enable debug logging.
    pub debug: bool,

    /// Program every task runs, `terraform`, `tofu` or `terragrunt`.
    pub program: String,

    /// Directory modules are discovered under.
    pub workdir: PathBuf,

    /// Directory for plan artefacts. `None` uses the platform data
    /// directory.
    pub data_dir: Option<PathBuf>,

    /// Maximum number of tasks running at once.
    pub max_tasks: usize,

    /// Terragrunt mode. `None` derives it from the program name.
    pub terragrunt: Option<bool>,

    /// Whether a provider plugin cache is shared between modules.
    /// `None` detects it from the environment.
    pub plugin_cache: Option<bool>,

    /// `KEY=VALUE` pairs added to the environment of every task.
    pub envs: Vec<String>,

    /// Run plans with `-json` and read machine-readable output.
    pub json_plans: bool,

    pub broker: BrokerConfig,

    pub logging: LoggingConfig,
}

impl Default for PugConfig {
    fn default() -> Self {
        Self {
            debug: false,
            program: "terraform".into(),
            workdir: PathBuf::from("."),
            data_dir: None,
            max_tasks: default_max_tasks(),
            terragrunt: None,
            plugin_cache: None,
            envs: Vec::new(),
            json_plans: false,
            broker: BrokerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PugConfig {
    /// Serializes to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if parsing fails.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Merges another config into this one.
    ///
    /// Values in `other` override values in `self` when they differ
    /// from the default.
    pub fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.debug != default.debug {
            self.debug = other.debug;
        }
        if other.program != default.program {
            self.program = other.program.clone();
        }
        if other.workdir != default.workdir {
            self.workdir = other.workdir.clone();
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir.clone();
        }
        if other.max_tasks != default.max_tasks {
            self.max_tasks = other.max_tasks;
        }
        if other.terragrunt.is_some() {
            self.terragrunt = other.terragrunt;
        }
        if other.plugin_cache.is_some() {
            self.plugin_cache = other.plugin_cache;
        }
        // Later layers add to the environment rather than replace it.
        self.envs.extend(other.envs.iter().cloned());
        if other.json_plans != default.json_plans {
            self.json_plans = other.json_plans;
        }

        self.broker.merge(&other.broker);
        self.logging.merge(&other.logging);
    }

    /// Returns whether modules are Terragrunt modules.
    #[must_use]
    pub fn is_terragrunt(&self) -> bool {
        self.terragrunt.unwrap_or_else(|| {
            Path::new(&self.program)
                .file_name()
                .is_some_and(|name| name == "terragrunt")
        })
    }

    /// Returns whether a plugin cache is in use, detecting it when
    /// not configured.
    #[must_use]
    pub fn uses_plugin_cache(&self) -> bool {
        self.plugin_cache.unwrap_or_else(detect_plugin_cache)
    }

    /// Returns the artefact directory, falling back to
    /// `<platform data dir>/pug`.
    #[must_use]
    pub fn data_dir_or_default(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pug")
        })
    }

    /// Splits `envs` into key/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an entry without `=`
    /// or with an empty key.
    pub fn task_env(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.envs
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(ConfigError::invalid_value(
                    "envs",
                    format!("expected KEY=VALUE, got '{entry}'"),
                )),
            })
            .collect()
    }
}

fn default_max_tasks() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

/// Event broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Queue capacity of each subscriber.
    pub buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { buffer: 100 }
    }
}

impl BrokerConfig {
    fn merge(&mut self, other: &Self) {
        if other.buffer != Self::default().buffer {
            self.buffer = other.buffer;
        }
    }
}

/// Logging configuration.
///
/// # Example TOML
///
/// ```toml
/// [logging]
/// file_path = "/var/log/pug.log"
/// file_level = "info"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to this file.
    pub file_path: Option<PathBuf>,

    /// Level filter of the file log.
    pub file_level: String,

    /// Log records kept in memory before the oldest are evicted.
    pub max_records: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            file_level: "debug".into(),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.file_path.is_some() {
            self.file_path = other.file_path.clone();
        }
        if other.file_level != default.file_level {
            self.file_level = other.file_level.clone();
        }
        if other.max_records != default.max_records {
            self.max_records = other.max_records;
        }
    }
}
