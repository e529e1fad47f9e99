//! Terragrunt dependency graph parsing.
//!
//! `terragrunt graph-dependencies` prints a graphviz digraph:
//!
//! ```text
//! digraph {
//!     "vpc" ;
//!     "redis" ;
//!     "redis" -> "vpc";
//!     "/home/me/infra/backend" -> "/home/me/infra/redis";
//! }
//! ```
//!
//! Node names are relative to the working directory or absolute.

use super::discovery::relative;
use crate::text;
use crate::PugError;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Parses a dependency digraph into `module path → dependency paths`,
/// every path relative to `workdir`.
///
/// Every node appears as a key, including those without dependencies.
///
/// # Errors
///
/// Returns [`PugError::Parse`] if the output is not a digraph or a
/// line cannot be read as a node or an edge.
pub fn parse_graph(
    output: &str,
    workdir: &Path,
) -> Result<BTreeMap<String, Vec<String>>, PugError> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let line_re = text::regex(&LINE, r#"^"([^"]+)"\s*(?:->\s*"([^"]+)")?\s*;?$"#)?;

    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(first) if first.starts_with("digraph") => {}
        _ => return Err(PugError::parse("dependency graph", "missing digraph header")),
    }

    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines {
        if line == "}" {
            break;
        }
        let caps = line_re
            .captures(line)
            .ok_or_else(|| PugError::parse("dependency graph", format!("unexpected line: {line}")))?;
        let from = normalize(&caps[1], workdir);
        let deps = graph.entry(from).or_default();
        if let Some(to) = caps.get(2) {
            let to = normalize(to.as_str(), workdir);
            if !deps.contains(&to) {
                deps.push(to.clone());
            }
            graph.entry(to).or_default();
        }
    }
    Ok(graph)
}

fn normalize(node: &str, workdir: &Path) -> String {
    let path = Path::new(node);
    let absolute = if path.is_absolute() {
        clean(path)
    } else {
        clean(&workdir.join(path))
    };
    relative(&clean(workdir), &absolute)
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
