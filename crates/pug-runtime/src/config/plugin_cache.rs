//! Provider plugin cache detection.
//!
//! Modules sharing a plugin cache must not run `init` concurrently, so
//! init tasks become exclusive when a cache is in use.

use crate::text;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Returns whether a plugin cache is configured, either through
/// `TF_PLUGIN_CACHE_DIR` or a `plugin_cache_dir` directive in the CLI
/// config file (`TF_CLI_CONFIG_FILE`, else `~/.terraformrc`).
#[must_use]
pub fn detect_plugin_cache() -> bool {
    let cache_dir = std::env::var("TF_PLUGIN_CACHE_DIR").ok();
    let cli_config = cli_config_path();
    detect_from(cache_dir.as_deref(), cli_config.as_deref())
}

fn cli_config_path() -> Option<PathBuf> {
    match std::env::var("TF_CLI_CONFIG_FILE") {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::home_dir().map(|home| home.join(".terraformrc")),
    }
}

fn detect_from(cache_dir: Option<&str>, cli_config: Option<&Path>) -> bool {
    if cache_dir.is_some_and(|dir| !dir.is_empty()) {
        debug!("plugin cache set by TF_PLUGIN_CACHE_DIR");
        return true;
    }
    let Some(path) = cli_config else {
        return false;
    };
    match std::fs::read_to_string(path) {
        Ok(contents) if sets_cache_dir(&contents) => {
            debug!(path = %path.display(), "plugin cache set in CLI config");
            true
        }
        _ => false,
    }
}

fn sets_cache_dir(contents: &str) -> bool {
    static DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    text::regex(&DIRECTIVE, r#"(?m)^\s*plugin_cache_dir\s*=\s*"[^"]+""#)
        .is_ok_and(|re| re.is_match(contents))
}
