//! Module discovery on disk.

use crate::PugError;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// A module directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    /// Path relative to the working directory; `.` for the root.
    pub path: String,
    /// Whether the directory has already been initialized.
    pub initialized: bool,
}

/// Walks `workdir` for root modules, sorted by path.
///
/// | Mode | A module is a directory holding | Initialized when present |
/// |------|-------------------------------|--------------------------|
/// | terraform | any `*.tf` file | `.terraform/` |
/// | terragrunt | `terragrunt.hcl` (not the root's) | `.terragrunt-cache/` |
///
/// Hidden directories are never entered, nor is any `modules/`
/// directory: those hold child modules, not roots.
///
/// # Errors
///
/// Returns [`PugError::Io`] if `workdir` cannot be read.
pub fn discover(workdir: &Path, terragrunt: bool) -> Result<Vec<DiscoveredModule>, PugError> {
    if !workdir.is_dir() {
        return Err(PugError::io(
            format!("reading {}", workdir.display()),
            &std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let mut found = Vec::new();
    let walker = WalkDir::new(workdir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skipped(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        let is_module = if terragrunt {
            entry.depth() > 0 && dir.join("terragrunt.hcl").is_file()
        } else {
            has_tf_files(dir)
        };
        if !is_module {
            continue;
        }

        let marker = if terragrunt { ".terragrunt-cache" } else { ".terraform" };
        found.push(DiscoveredModule {
            path: relative(workdir, dir),
            initialized: dir.join(marker).is_dir(),
        });
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

fn skipped(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "modules"
}

fn has_tf_files(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|e| {
        e.path().extension().is_some_and(|ext| ext == "tf")
            && e.file_type().map(|t| t.is_file()).unwrap_or(false)
    })
}

/// Returns `dir` relative to `workdir` with `/` separators; `.` for the
/// root itself.
pub(crate) fn relative(workdir: &Path, dir: &Path) -> String {
    let rel = dir.strip_prefix(workdir).unwrap_or(dir);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
