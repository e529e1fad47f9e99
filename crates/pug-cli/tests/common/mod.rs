//! Shared E2E helpers for `pug` binary tests.

#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin_cmd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Default timeout for a whole `pug` run.
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// A module named `broken` fails validation; everything else succeeds.
const FAKE_TERRAFORM: &str = r#"#!/bin/sh
module=$(basename "$(pwd -P)")
case "$1" in
  init)
    mkdir -p .terraform
    echo "Terraform has been successfully initialized!"
    ;;
  workspace)
    printf '* default\n'
    ;;
  validate)
    if [ "$module" = "broken" ]; then
      echo "Error: Unsupported argument" >&2
      exit 1
    fi
    echo "Success! The configuration is valid."
    ;;
  plan)
    if [ "$module" = "empty" ]; then
      echo "No changes. Your infrastructure matches the configuration."
    else
      echo "Plan: 1 to add, 0 to change, 0 to destroy."
    fi
    ;;
  apply)
    echo "Apply complete! Resources: 1 added, 0 changed, 0 destroyed."
    ;;
  state)
    printf '{"version":4,"serial":1,"resources":[{"mode":"managed","type":"null_resource","name":"web","instances":[{"status":"tainted","attributes":{"id":"1"}}]}]}\n'
    ;;
esac
"#;

/// Environment variables that would leak a developer's settings into
/// a test run.
const PUG_VARS: &[&str] = &[
    "PUG_DEBUG",
    "PUG_PROGRAM",
    "PUG_WORKDIR",
    "PUG_DATA_DIR",
    "PUG_MAX_TASKS",
    "PUG_TERRAGRUNT",
    "PUG_JSON_PLANS",
    "PUG_LOG_FILE",
    "PUG_LOG_LEVEL",
    "TF_PLUGIN_CACHE_DIR",
    "TF_CLI_CONFIG_FILE",
];

/// A scratch tree with a fake `terraform` and module directories.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(dir.path().join("work")).expect("create workdir");
        let program = dir.path().join("terraform");
        std::fs::write(&program, FAKE_TERRAFORM).expect("write fake terraform");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("make fake terraform executable");
        Self { dir }
    }

    /// Adds a module directory; initialized ones get `.terraform`.
    pub fn module(self, path: &str, initialized: bool) -> Self {
        let module = self.workdir().join(path);
        std::fs::create_dir_all(&module).expect("create module dir");
        std::fs::write(module.join("main.tf"), "").expect("write main.tf");
        if initialized {
            std::fs::create_dir_all(module.join(".terraform")).expect("create .terraform");
        }
        self
    }

    pub fn workdir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `pug` pointed at this project, isolated from the caller's
    /// configuration.
    pub fn pug(&self) -> assert_cmd::Command {
        let mut cmd: assert_cmd::Command = cargo_bin_cmd!("pug");
        cmd.timeout(TIMEOUT);
        for var in PUG_VARS {
            cmd.env_remove(var);
        }
        cmd.env("HOME", self.path())
            .env("PUG_PLUGIN_CACHE", "false")
            .arg("-C")
            .arg(self.workdir())
            .arg("-p")
            .arg(self.path().join("terraform"))
            .arg("--data-dir")
            .arg(self.path().join("data"));
        cmd
    }
}
