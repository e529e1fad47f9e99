//! CLI configuration overrides.
//!
//! Implements [`ConfigResolver`] for CLI flag overrides.

use pug_runtime::{ConfigResolver, PugConfig};
use std::path::PathBuf;

/// CLI configuration overrides.
///
/// Applied as the highest priority layer after file/env config loading.
///
/// # Example
///
/// ```
/// use pug_app::{CliOverrides, ConfigResolver, PugConfig};
///
/// let mut config = PugConfig::default();
///
/// CliOverrides::new()
///     .program("tofu")
///     .max_tasks_opt(Some(3))
///     .apply(&mut config);
///
/// assert_eq!(config.program, "tofu");
/// assert_eq!(config.max_tasks, 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    debug: Option<bool>,
    program: Option<String>,
    workdir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    max_tasks: Option<usize>,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
}

impl CliOverrides {
    /// Creates a new empty overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets debug mode override.
    #[must_use]
    pub fn debug(mut self, value: bool) -> Self {
        self.debug = Some(value);
        self
    }

    /// Sets the program override.
    #[must_use]
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Sets the working directory override.
    #[must_use]
    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = Some(path.into());
        self
    }

    /// Sets debug mode override if Some.
    #[must_use]
    pub fn debug_opt(mut self, value: Option<bool>) -> Self {
        if let Some(v) = value {
            self.debug = Some(v);
        }
        self
    }

    /// Sets the program override if Some.
    #[must_use]
    pub fn program_opt(mut self, program: Option<String>) -> Self {
        if let Some(p) = program {
            self.program = Some(p);
        }
        self
    }

    /// Sets the working directory override if Some.
    #[must_use]
    pub fn workdir_opt(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.workdir = Some(p);
        }
        self
    }

    /// Sets the artefact directory override if Some.
    #[must_use]
    pub fn data_dir_opt(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.data_dir = Some(p);
        }
        self
    }

    /// Sets the task limit override if Some. Zero is ignored.
    #[must_use]
    pub fn max_tasks_opt(mut self, value: Option<usize>) -> Self {
        if let Some(n) = value.filter(|n| *n > 0) {
            self.max_tasks = Some(n);
        }
        self
    }

    /// Sets the log file override if Some.
    #[must_use]
    pub fn log_file_opt(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.log_file = Some(p);
        }
        self
    }

    /// Sets the file log level override if Some.
    #[must_use]
    pub fn log_level_opt(mut self, level: Option<String>) -> Self {
        if let Some(l) = level {
            self.log_level = Some(l);
        }
        self
    }
}

impl ConfigResolver for CliOverrides {
    fn apply(&self, config: &mut PugConfig) {
        if let Some(d) = self.debug {
            config.debug = d;
        }
        if let Some(ref p) = self.program {
            config.program = p.clone();
        }
        if let Some(ref p) = self.workdir {
            config.workdir = p.clone();
        }
        if let Some(ref p) = self.data_dir {
            config.data_dir = Some(p.clone());
        }
        if let Some(n) = self.max_tasks {
            config.max_tasks = n;
        }
        if let Some(ref p) = self.log_file {
            config.logging.file_path = Some(p.clone());
        }
        if let Some(ref l) = self.log_level {
            config.logging.file_level = l.clone();
        }
    }
}
