//! pug - run terraform across many modules and workspaces at once
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`PUG_*`)
//! 3. Project config (`.pug/config.toml` in the working directory)
//! 4. Global config (`~/.pug/config.toml`)
//! 5. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `PUG_DEBUG`: Enable debug mode (`true`/`false`)
//! - `PUG_PROGRAM`: Program to run (`terraform`, `tofu`, `terragrunt`)
//! - `PUG_WORKDIR`: Directory modules are discovered under
//! - `PUG_DATA_DIR`: Plan artefact directory
//! - `PUG_MAX_TASKS`: Maximum tasks running at once
//! - `PUG_TERRAGRUNT`: Force Terragrunt mode on or off
//! - `PUG_PLUGIN_CACHE`: Force plugin cache handling on or off
//! - `PUG_JSON_PLANS`: Run plans with `-json`
//! - `PUG_LOG_FILE`, `PUG_LOG_LEVEL`: File logging

mod commands;
mod log_file;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::ModuleCommand;
use pug_app::{CliOverrides, ConfigLoader, ConfigResolver, EntityLayer, PlanOptions, PugApp, PugConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// How long to wait for canceled tasks after an interrupt.
const INTERRUPT_GRACE: Duration = Duration::from_secs(10);

/// pug - run terraform across many modules and workspaces at once
#[derive(Parser, Debug)]
#[command(name = "pug")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory to discover modules under (defaults to current directory)
    #[arg(short = 'C', long, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// Program to run: terraform, tofu or terragrunt (also: PUG_PROGRAM)
    #[arg(short, long)]
    program: Option<String>,

    /// Maximum number of tasks running at once (also: PUG_MAX_TASKS)
    #[arg(short = 't', long, value_name = "N")]
    max_tasks: Option<usize>,

    /// Directory for plan artefacts (also: PUG_DATA_DIR)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to this file (also: PUG_LOG_FILE)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// File log level (also: PUG_LOG_LEVEL, default: debug)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List modules with their initialization state
    Modules,
    /// List workspaces, marking the current one
    Workspaces,
    /// Run init on every module
    Init {
        /// Upgrade modules and providers
        #[arg(long)]
        upgrade: bool,
    },
    /// Run validate on every initialized module
    Validate,
    /// Run fmt on every initialized module
    Fmt,
    /// Plan every current workspace
    Plan(PlanArgs),
    /// Plan every current workspace and apply the plans with changes
    Apply(PlanArgs),
    /// List the resources in state of every current workspace
    State,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// Plan to destroy every resource
    #[arg(long)]
    destroy: bool,

    /// Limit the plan to this resource address (repeatable)
    #[arg(long = "target", value_name = "ADDR")]
    targets: Vec<String>,
}

impl PlanArgs {
    fn options(&self) -> PlanOptions {
        self.targets
            .iter()
            .fold(PlanOptions::default().destroy(self.destroy), |opts, t| {
                opts.target(t.clone())
            })
    }
}

/// Loads file and environment config for `args`, then applies the
/// flags as the highest-priority layer.
fn resolve_config(args: &Args) -> Result<PugConfig> {
    let root = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = ConfigLoader::new().with_project_root(root).load()?;
    overrides(args).apply(&mut config);
    Ok(config)
}

fn overrides(args: &Args) -> CliOverrides {
    CliOverrides::new()
        .debug_opt(args.debug.then_some(true))
        .workdir_opt(args.workdir.clone())
        .program_opt(args.program.clone())
        .data_dir_opt(args.data_dir.clone())
        .max_tasks_opt(args.max_tasks)
        .log_file_opt(args.log_file.clone())
        .log_level_opt(args.log_level.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args).map_err(|e| anyhow::anyhow!("Config error: {e}"))?;

    // --- Tracing setup: independent terminal and file filters ---
    //
    // Terminal filter: --debug > --verbose > RUST_LOG env > default "warn"
    // File filter:     config.logging.file_level (default "debug")
    let terminal_filter = if config.debug {
        EnvFilter::new("debug,tokio=warn")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    let file_layer = config
        .logging
        .file_path
        .as_deref()
        .and_then(log_file::open)
        .map(|file| {
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file::FileMakeWriter::new(file))
                .with_filter(EnvFilter::new(&config.logging.file_level))
        });

    let (entity_layer, log_source) = EntityLayer::new();
    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .with(entity_layer.with_filter(EnvFilter::new("info")))
        .init();

    info!(workdir = %config.workdir.display(), program = %config.program, "starting");

    let app = PugApp::builder(config)
        .log_source(log_source)
        .watch_workspaces(false)
        .build()
        .await?;

    let ok = tokio::select! {
        result = run(&app, &args.command) => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted, canceling tasks");
            app.cancel_active().await;
            let pending = app.tasks().list();
            if tokio::time::timeout(INTERRUPT_GRACE, app.wait_all(&pending)).await.is_err() {
                eprintln!("tasks still running after {}s", INTERRUPT_GRACE.as_secs());
            }
            false
        }
    };

    app.shutdown().await;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(app: &PugApp, command: &Command) -> Result<bool> {
    match command {
        Command::Modules => commands::modules(app).await,
        Command::Workspaces => commands::workspaces(app).await,
        Command::Init { upgrade } => {
            commands::module_command(app, ModuleCommand::Init { upgrade: *upgrade }).await
        }
        Command::Validate => commands::module_command(app, ModuleCommand::Validate).await,
        Command::Fmt => commands::module_command(app, ModuleCommand::Format).await,
        Command::Plan(plan) => commands::plan(app, &plan.options()).await,
        Command::Apply(plan) => commands::apply(app, &plan.options()).await,
        Command::State => commands::state(app).await,
    }
}
