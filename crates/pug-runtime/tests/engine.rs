//! Task engine tests against a fake terraform.
//!
//! Each test runs real child processes through create → schedule →
//! run → hooks and checks the order the fake program saw calls in.

mod common;

use common::{module_dir, position, Harness, Options};
use pug_runtime::module::Tri;
use pug_runtime::task::{NoHooks, TaskKind, TaskSpec, TaskState};
use pug_runtime::PugError;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn uninitialized_module_waits_for_init() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", false)).await;
    let module = h.module("a");
    assert_eq!(module.initialized, Tri::Unknown);

    let validate = h.modules.validate(module.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(h.state_of(&validate), TaskState::Pending);

    let init = h.modules.init(module.id, false).await.unwrap();
    assert_eq!(init.args, ["init", "-input=false"]);

    assert_eq!(h.finish(&init).await.state, TaskState::Exited);
    assert_eq!(h.finish(&validate).await.state, TaskState::Exited);

    let calls = h.calls();
    assert!(position(&calls, "end a init") < position(&calls, "start a validate"));
    let module = h.module("a");
    assert_eq!(module.initialized, Tri::True);
    assert_eq!(module.valid, Tri::True);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn apply_blocks_its_workspace() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", true)).await;
    let module = h.module("a");
    let dev = h.workspace(&module, "dev").await;

    let apply = h
        .tasks
        .create(
            TaskSpec::new(TaskKind::Apply, module.id, ["apply"])
                .workspace(dev.id)
                .blocking(true),
        )
        .await
        .unwrap();
    let plan = h
        .tasks
        .create(TaskSpec::new(TaskKind::Plan, module.id, ["plan"]).workspace(dev.id))
        .await
        .unwrap();
    assert_eq!(plan.workspace_name.as_deref(), Some("dev"));

    h.finish(&apply).await;
    h.finish(&plan).await;

    let calls = h.calls();
    assert!(position(&calls, "end a apply") < position(&calls, "start a plan"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workspaces_of_one_module_run_in_parallel() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", true)).await;
    let module = h.module("a");
    let dev = h.workspace(&module, "dev").await;
    let prod = h.workspace(&module, "prod").await;

    let first = h
        .tasks
        .create(TaskSpec::new(TaskKind::Apply, module.id, ["apply"]).workspace(dev.id))
        .await
        .unwrap();
    let second = h
        .tasks
        .create(TaskSpec::new(TaskKind::Apply, module.id, ["apply"]).workspace(prod.id))
        .await
        .unwrap();
    h.finish(&first).await;
    h.finish(&second).await;

    let calls = h.calls();
    // Both started before either ended.
    assert_eq!(&calls[0][..5], "start");
    assert_eq!(&calls[1][..5], "start");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn plugin_cache_makes_init_exclusive() {
    let opts = Options {
        plugin_cache: true,
        ..Options::default()
    };
    let h = Harness::start(opts, |w| {
        module_dir(w, "a", false);
        module_dir(w, "b", false);
    })
    .await;

    let a = h.modules.init(h.module("a").id, false).await.unwrap();
    let b = h.modules.init(h.module("b").id, true).await.unwrap();
    assert!(a.exclusive && b.exclusive);
    assert_eq!(b.args, ["init", "-input=false", "-upgrade"]);

    h.finish(&a).await;
    h.finish(&b).await;

    let calls = h.calls();
    assert_eq!(
        calls,
        ["start a init", "end a init", "start b init", "end b init"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn immediate_task_waits_for_exclusive_init() {
    let opts = Options {
        plugin_cache: true,
        ..Options::default()
    };
    let h = Harness::start(opts, |w| {
        module_dir(w, "a", false);
        module_dir(w, "b", true);
    })
    .await;

    let init = h.modules.init(h.module("a").id, false).await.unwrap();
    assert!(init.exclusive);
    h.until("init to run", || h.state_of(&init) == TaskState::Running)
        .await;

    let select = h
        .tasks
        .create(TaskSpec::new(TaskKind::WorkspaceSelect, h.module("b").id, ["hang"]).immediate(true))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(h.state_of(&select), TaskState::Queued);
    assert_eq!(h.runner.running(), 1);

    h.finish(&init).await;
    h.until("immediate task to run", || h.state_of(&select) == TaskState::Running)
        .await;
    assert_eq!(h.runner.running(), 1);
    h.until("process to start", || h.calls().len() == 3).await;
    let calls = h.calls();
    assert!(position(&calls, "end a init") < position(&calls, "start b hang"));

    h.tasks.cancel(select.id).await.unwrap();
    assert_eq!(h.finish(&select).await.state, TaskState::Canceled);
    h.until("runner to drain", || h.runner.running() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_tasks_limits_concurrency() {
    let opts = Options {
        max_tasks: 1,
        ..Options::default()
    };
    let h = Harness::start(opts, |w| {
        module_dir(w, "a", true);
        module_dir(w, "b", true);
    })
    .await;

    let a = h.modules.validate(h.module("a").id).await.unwrap();
    let b = h.modules.validate(h.module("b").id).await.unwrap();
    h.finish(&a).await;
    h.finish(&b).await;

    let calls = h.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[0].starts_with("start") && calls[1].starts_with("end"));
    assert!(calls[2].starts_with("start") && calls[3].starts_with("end"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_pending_never_spawns() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", false)).await;
    let module = h.module("a");

    let task = h.modules.validate(module.id).await.unwrap();
    let canceled = h.tasks.cancel(task.id).await.unwrap();
    assert_eq!(canceled.state, TaskState::Canceled);
    assert!(canceled.output().is_closed());

    // Once initialized nothing is left to run.
    let init = h.modules.init(module.id, false).await.unwrap();
    h.finish(&init).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert_eq!(h.calls(), ["start a init", "end a init"]);
    let module = h.module("a");
    assert!(!module.validate_in_progress);
    assert_eq!(module.valid, Tri::Unknown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_running_interrupts_process() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", true)).await;
    let module = h.module("a");

    let task = h
        .tasks
        .create(TaskSpec::new(TaskKind::Plan, module.id, ["hang"]))
        .await
        .unwrap();
    h.until("task to run", || h.state_of(&task) == TaskState::Running)
        .await;
    h.until("process to start", || h.calls().len() == 1).await;

    h.tasks.cancel(task.id).await.unwrap();
    let done = h.finish(&task).await;
    assert_eq!(done.state, TaskState::Canceled);
    assert!(done.error.is_none());
    // Interrupted before the script could log its end.
    assert_eq!(h.calls(), ["start a hang"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nonzero_exit_errors_with_last_line() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", true)).await;
    let module = h.module("a");

    let task = h
        .tasks
        .create(TaskSpec::new(TaskKind::Validate, module.id, ["fail"]).hooks(Arc::new(NoHooks)))
        .await
        .unwrap();
    let done = h.finish(&task).await;

    assert_eq!(done.state, TaskState::Errored);
    assert_eq!(done.exit_code, Some(1));
    match done.error {
        Some(PugError::Task(msg)) => assert!(msg.ends_with(": Error: boom"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_returns_terminal_task() {
    let h = Harness::start(Options::default(), |w| module_dir(w, "a", true)).await;
    let module = h.module("a");

    let task = h
        .tasks
        .create(
            TaskSpec::new(TaskKind::Validate, module.id, ["validate"])
                .immediate(true)
                .wait(true),
        )
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Exited);
    assert!(task.output().text().contains("configuration is valid"));
    assert!(task.output().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terragrunt_dependencies_order_tasks() {
    let opts = Options {
        terragrunt: true,
        ..Options::default()
    };
    let h = Harness::start(opts, |w| {
        module_dir(w, "app", true);
        module_dir(w, "vpc", true);
    })
    .await;

    let app = h.module("app");
    let vpc = h.module("vpc");
    assert_eq!(app.dependencies, [vpc.id]);

    let specs = [app.id, vpc.id]
        .into_iter()
        .map(|m| TaskSpec::new(TaskKind::Validate, m, ["validate"]).respect_dependencies(true, false))
        .collect();
    let created = h.tasks.create_dependent(specs).await.unwrap();
    assert_eq!(created[0].module_id, vpc.id);
    assert_eq!(created[1].depends_on, [created[0].id]);

    for task in &created {
        assert_eq!(h.finish(task).await.state, TaskState::Exited);
    }
    let calls = h.calls();
    assert!(position(&calls, "end vpc validate") < position(&calls, "start app validate"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_dependency_cancels_dependent() {
    let opts = Options {
        terragrunt: true,
        ..Options::default()
    };
    let h = Harness::start(opts, |w| {
        module_dir(w, "app", true);
        module_dir(w, "vpc", true);
    })
    .await;
    let app = h.module("app");
    let vpc = h.module("vpc");

    let specs = vec![
        TaskSpec::new(TaskKind::Validate, app.id, ["validate"]).respect_dependencies(true, false),
        TaskSpec::new(TaskKind::Validate, vpc.id, ["fail"]).respect_dependencies(true, false),
    ];
    let created = h.tasks.create_dependent(specs).await.unwrap();

    assert_eq!(h.finish(&created[0]).await.state, TaskState::Errored);
    let dependent = h.finish(&created[1]).await;
    assert_eq!(dependent.state, TaskState::Canceled);
    assert_eq!(dependent.error, Some(PugError::task("dependency failed")));
    assert!(!h.calls().iter().any(|c| c.starts_with("start app")));
}
