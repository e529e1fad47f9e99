//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Global config (`~/.pug/config.toml`)
//! 3. Project config (`<workdir>/.pug/config.toml`)
//! 4. Environment variables (`PUG_*`)
//!
//! Each layer overrides the previous.

use super::{default_config_path, ConfigError, PugConfig, PROJECT_CONFIG_DIR, PROJECT_CONFIG_FILE};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use pug_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_project_root("infra")
///     .load()?;
/// # Ok::<(), pug_runtime::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.pug/config.toml).
    global_config_path: Option<PathBuf>,

    /// Working directory holding the project config.
    project_root: Option<PathBuf>,

    skip_env: bool,
    skip_global: bool,
    skip_project: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom global config path.
    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Sets the project root directory.
    ///
    /// Project config will be loaded from `<project_root>/.pug/config.toml`.
    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips global config loading.
    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    /// Skips project config loading.
    #[must_use]
    pub fn skip_project_config(mut self) -> Self {
        self.skip_project = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be
    /// read or parsed, or an environment variable holds an invalid
    /// value. Missing config files are ignored.
    pub fn load(&self) -> Result<PugConfig, ConfigError> {
        let mut config = PugConfig::default();

        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if let Some(global_config) = load_file(&global_path)? {
                debug!(path = %global_path.display(), "loaded global config");
                config.merge(&global_config);
            }
        }

        if !self.skip_project {
            if let Some(ref project_root) = self.project_root {
                let path = project_root.join(PROJECT_CONFIG_DIR).join(PROJECT_CONFIG_FILE);

                if let Some(project_config) = load_file(&path)? {
                    debug!(path = %path.display(), "loaded project config");
                    config.merge(&project_config);
                }
            }
        }

        if !self.skip_env {
            apply_env_vars(&mut config)?;
        }

        Ok(config)
    }
}

/// Loads a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<PugConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let config = PugConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;

    Ok(Some(config))
}

fn apply_env_vars(config: &mut PugConfig) -> Result<(), ConfigError> {
    parse_env_bool!(config.debug, "PUG_DEBUG");
    parse_env_bool!(config.json_plans, "PUG_JSON_PLANS");

    if let Ok(val) = std::env::var("PUG_TERRAGRUNT") {
        let yes = parse_bool(&val)
            .ok_or_else(|| ConfigError::invalid_env_var("PUG_TERRAGRUNT", "expected bool"))?;
        config.terragrunt = Some(yes);
    }
    if let Ok(val) = std::env::var("PUG_PLUGIN_CACHE") {
        let yes = parse_bool(&val)
            .ok_or_else(|| ConfigError::invalid_env_var("PUG_PLUGIN_CACHE", "expected bool"))?;
        config.plugin_cache = Some(yes);
    }

    if let Ok(val) = std::env::var("PUG_MAX_TASKS") {
        config.max_tasks = match val.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(ConfigError::invalid_env_var(
                    "PUG_MAX_TASKS",
                    "expected positive integer",
                ))
            }
        };
    }

    if let Ok(val) = std::env::var("PUG_PROGRAM") {
        config.program = val;
    }
    if let Ok(val) = std::env::var("PUG_LOG_LEVEL") {
        config.logging.file_level = val;
    }

    if let Ok(val) = std::env::var("PUG_WORKDIR") {
        config.workdir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("PUG_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("PUG_LOG_FILE") {
        config.logging.file_path = Some(PathBuf::from(val));
    }

    Ok(())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off"
/// (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_defaults_only() {
        let config = ConfigLoader::new()
            .skip_global_config()
            .skip_project_config()
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config, PugConfig::default());
    }

    #[test]
    fn load_project_overrides_global() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let global_path = create_config_file(
            global.path(),
            r#"
debug = true
program = "tofu"
envs = ["A=1"]
"#,
        );
        create_config_file(
            &project.path().join(".pug"),
            r#"
program = "terragrunt"
envs = ["B=2"]

[logging]
file_level = "info"
"#,
        );

        let config = ConfigLoader::new()
            .with_global_config(&global_path)
            .with_project_root(project.path())
            .skip_env_vars()
            .load()
            .unwrap();

        assert!(config.debug);
        assert_eq!(config.program, "terragrunt");
        assert_eq!(config.envs, ["A=1", "B=2"]);
        assert_eq!(config.logging.file_level, "info");
    }

    #[test]
    fn missing_config_files_ok() {
        let config = ConfigLoader::new()
            .with_global_config("/nonexistent/path/config.toml")
            .with_project_root("/nonexistent/project")
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config, PugConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = create_config_file(temp.path(), "max_tasks = \"many\"");

        let err = ConfigLoader::new()
            .with_global_config(&path)
            .skip_project_config()
            .skip_env_vars()
            .load()
            .unwrap_err();

        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("OFF"), Some(false));
        assert_eq!(parse_bool("invalid"), None);
    }

    #[test]
    fn env_var_override() {
        // Only this test touches PUG_* variables.
        std::env::set_var("PUG_DEBUG", "yes");
        std::env::set_var("PUG_PROGRAM", "tofu");
        std::env::set_var("PUG_MAX_TASKS", "3");
        std::env::set_var("PUG_TERRAGRUNT", "false");
        std::env::set_var("PUG_DATA_DIR", "/srv/pug");

        let config = ConfigLoader::new()
            .skip_global_config()
            .skip_project_config()
            .load();

        std::env::set_var("PUG_MAX_TASKS", "zero");
        let invalid = ConfigLoader::new()
            .skip_global_config()
            .skip_project_config()
            .load();

        for var in ["PUG_DEBUG", "PUG_PROGRAM", "PUG_MAX_TASKS", "PUG_TERRAGRUNT", "PUG_DATA_DIR"] {
            std::env::remove_var(var);
        }

        let config = config.unwrap();
        assert!(config.debug);
        assert_eq!(config.program, "tofu");
        assert_eq!(config.max_tasks, 3);
        assert_eq!(config.terragrunt, Some(false));
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/pug")));

        assert!(matches!(
            invalid,
            Err(ConfigError::InvalidEnvVar { ref name, .. }) if name == "PUG_MAX_TASKS"
        ));
    }
}
