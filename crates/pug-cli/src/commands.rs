//! Subcommands.
//!
//! Each returns `Ok(false)` when one of the tasks it ran did not exit
//! cleanly; `main` turns that into a nonzero exit status.

use anyhow::Result;
use pug_app::{strip_ansi, Id, Plan, PlanOptions, PugApp, Task, TaskState, Tri};
use tracing::debug;

/// Module-wide commands run on every module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleCommand {
    Init { upgrade: bool },
    Validate,
    Format,
}

/// Lists modules with their initialization state and dependencies.
pub async fn modules(app: &PugApp) -> Result<bool> {
    app.reload_modules().await?;
    let modules = app.modules().list();
    if modules.is_empty() {
        println!("no modules found under {}", app.config().workdir.display());
    }
    for module in &modules {
        let deps: Vec<String> = module
            .dependencies
            .iter()
            .filter_map(|id| app.modules().get(*id).ok())
            .map(|m| m.path)
            .collect();
        if deps.is_empty() {
            println!("{}\tinitialized={}", module.path, module.initialized);
        } else {
            println!(
                "{}\tinitialized={}\tdepends_on={}",
                module.path,
                module.initialized,
                deps.join(",")
            );
        }
    }
    Ok(true)
}

/// Lists the workspaces of every initialized module, marking the
/// current one.
pub async fn workspaces(app: &PugApp) -> Result<bool> {
    let ok = reload(app).await?;
    for module in app.modules().list() {
        if module.initialized != Tri::True {
            println!("  {}: not initialized", module.path);
            continue;
        }
        for ws in app.workspaces().list(module.id) {
            let mark = if module.current_workspace_id == Some(ws.id) {
                '*'
            } else {
                ' '
            };
            println!("{mark} {}:{}", module.path, ws.name);
        }
    }
    Ok(ok)
}

/// Runs init, validate or fmt on every module. Validate and fmt skip
/// modules that are not initialized.
pub async fn module_command(app: &PugApp, command: ModuleCommand) -> Result<bool> {
    app.reload_modules().await?;
    let mut created = Vec::new();
    for module in app.modules().list() {
        let task = match command {
            ModuleCommand::Init { upgrade } => app.modules().init(module.id, upgrade).await?,
            _ if module.initialized != Tri::True => {
                println!("[{}] skipped: not initialized", module.path);
                continue;
            }
            ModuleCommand::Validate => app.modules().validate(module.id).await?,
            ModuleCommand::Format => app.modules().format(module.id).await?,
        };
        created.push(task);
    }
    let done = stream(app, &created).await?;
    Ok(report_failures(&done))
}

/// Plans every current workspace and prints the reports.
pub async fn plan(app: &PugApp, opts: &PlanOptions) -> Result<bool> {
    let (plans, ok) = run_plans(app, opts).await?;
    for plan in &plans {
        match plan.report {
            Some(report) if plan.has_changes => println!("{}: {report}", plan_name(plan)),
            Some(_) => println!("{}: no changes", plan_name(plan)),
            None => {}
        }
    }
    Ok(ok)
}

/// Plans every current workspace, then applies the plans with changes.
pub async fn apply(app: &PugApp, opts: &PlanOptions) -> Result<bool> {
    let (plans, mut ok) = run_plans(app, opts).await?;
    let mut ids: Vec<Id> = Vec::new();
    for plan in &plans {
        if plan.has_changes {
            ids.push(plan.id);
        } else if plan.report.is_some() {
            println!("{}: no changes", plan_name(plan));
        }
    }
    if ids.is_empty() {
        return Ok(ok);
    }

    let tasks = app.plans().apply_many(&ids).await?;
    let done = stream(app, &tasks).await?;
    ok &= report_failures(&done);

    for id in ids {
        let plan = app.plans().get(id)?;
        if let Some(report) = plan.apply_report {
            println!("{}: applied {report}", plan_name(&plan));
        }
    }
    Ok(ok)
}

/// Lists the resources in the state of every current workspace.
pub async fn state(app: &PugApp) -> Result<bool> {
    let mut ok = reload(app).await?;
    let current = app.current_workspaces();
    let mut created = Vec::with_capacity(current.len());
    for ws in &current {
        created.push(app.state().reload(ws.id).await?);
    }
    // State output is JSON; not worth streaming.
    let done = app.wait_all(&created).await?;
    ok &= report_failures(&done);

    for ws in &current {
        println!("{}:{}", ws.module_path, ws.name);
        for resource in app.state().resources(ws.id) {
            if resource.tainted {
                println!("  {} (tainted)", resource.address);
            } else {
                println!("  {}", resource.address);
            }
        }
    }
    Ok(ok)
}

/// Reloads modules, then the workspaces of initialized ones.
async fn reload(app: &PugApp) -> Result<bool> {
    app.reload_modules().await?;
    let reloads = app.reload_workspaces().await?;
    Ok(report_failures(&reloads))
}

async fn run_plans(app: &PugApp, opts: &PlanOptions) -> Result<(Vec<Plan>, bool)> {
    let mut ok = reload(app).await?;
    let ids: Vec<Id> = app.current_workspaces().iter().map(|w| w.id).collect();
    if ids.is_empty() {
        println!("no initialized modules with a current workspace");
        return Ok((Vec::new(), ok));
    }

    let plans = app.plans().plan_many(&ids, opts).await?;
    let tasks = plans
        .iter()
        .filter_map(|p| p.plan_task_id)
        .map(|id| app.tasks().get(id))
        .collect::<Result<Vec<_>, _>>()?;
    let done = stream(app, &tasks).await?;
    ok &= report_failures(&done);

    let plans = plans
        .iter()
        .map(|p| app.plans().get(p.id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((plans, ok))
}

fn plan_name(plan: &Plan) -> String {
    format!("{}:{}", plan.module_path, plan.workspace_name)
}

/// Prints each task's output line by line, prefixed with its module
/// (and workspace), until every task has finished.
async fn stream(app: &PugApp, tasks: &[Task]) -> Result<Vec<Task>> {
    let printers: Vec<_> = tasks
        .iter()
        .map(|task| {
            let prefix = match &task.workspace_name {
                Some(ws) => format!("{}:{ws}", task.module_path),
                None => task.module_path.clone(),
            };
            let mut reader = task.output().reader();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = reader.read(&mut chunk).await;
                    if n == 0 {
                        break;
                    }
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        print_line(&prefix, &line);
                    }
                }
                if !pending.is_empty() {
                    print_line(&prefix, &pending);
                }
            })
        })
        .collect();

    let done = app.wait_all(tasks).await?;
    for printer in printers {
        if let Err(e) = printer.await {
            debug!(error = %e, "output printer ended abnormally");
        }
    }
    Ok(done)
}

fn print_line(prefix: &str, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    println!("[{prefix}] {}", strip_ansi(text.trim_end()));
}

/// Prints tasks that did not exit. Returns `true` if there were none.
fn report_failures(tasks: &[Task]) -> bool {
    let mut ok = true;
    for task in tasks {
        match task.state {
            TaskState::Exited => {}
            TaskState::Errored => {
                ok = false;
                let reason = task
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                eprintln!("error: {} in {}: {reason}", task.kind, task.module_path);
            }
            state => {
                ok = false;
                eprintln!("{} in {}: {state}", task.kind, task.module_path);
            }
        }
    }
    ok
}
