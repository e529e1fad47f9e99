//! Configuration management.
//!
//! # Priority
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ CLI overrides (ConfigResolver)     highest  │
//! ├─────────────────────────────────────────────┤
//! │ Environment variables (PUG_*)               │
//! ├─────────────────────────────────────────────┤
//! │ Project config (<workdir>/.pug/config.toml) │
//! ├─────────────────────────────────────────────┤
//! │ Global config (~/.pug/config.toml)          │
//! ├─────────────────────────────────────────────┤
//! │ Default values                     lowest   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field | Type |
//! |----------|-------|------|
//! | `PUG_DEBUG` | `debug` | bool |
//! | `PUG_PROGRAM` | `program` | string |
//! | `PUG_WORKDIR` | `workdir` | path |
//! | `PUG_DATA_DIR` | `data_dir` | path |
//! | `PUG_MAX_TASKS` | `max_tasks` | integer |
//! | `PUG_TERRAGRUNT` | `terragrunt` | bool |
//! | `PUG_PLUGIN_CACHE` | `plugin_cache` | bool |
//! | `PUG_JSON_PLANS` | `json_plans` | bool |
//! | `PUG_LOG_FILE` | `logging.file_path` | path |
//! | `PUG_LOG_LEVEL` | `logging.file_level` | string |
//!
//! # Example
//!
//! ```toml
//! program = "terragrunt"
//! max_tasks = 8
//! envs = ["TF_IN_AUTOMATION=1"]
//!
//! [logging]
//! file_path = "/tmp/pug.log"
//! ```

mod error;
mod loader;
mod plugin_cache;
mod resolver;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use plugin_cache::detect_plugin_cache;
pub use resolver::{ConfigResolver, NoOpResolver};
pub use types::{BrokerConfig, LoggingConfig, PugConfig};

use std::path::PathBuf;

/// Project-local config directory name.
pub const PROJECT_CONFIG_DIR: &str = ".pug";

/// Config file name, in both the global and project directories.
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

/// Returns the global config directory (`~/.pug`).
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PROJECT_CONFIG_DIR)
}

/// Returns the global config file path (`~/.pug/config.toml`).
#[must_use]
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(PROJECT_CONFIG_FILE)
}
