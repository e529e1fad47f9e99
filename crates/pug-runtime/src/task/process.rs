//! Child-process driver.
//!
//! Children are started in their own process group so that a cancel
//! reaches terraform and every provider plugin it launched.

use super::TaskControl;
use crate::output::OutputBuffer;
use crate::PugError;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything needed to start one child.
#[derive(Debug)]
pub(crate) struct Invocation<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Runs the child to completion, copying stdout and stderr into
/// `output` in arrival order. The buffer is closed on return.
///
/// # Errors
///
/// Returns [`PugError::Spawn`] if the process cannot be started, or
/// [`PugError::Io`] if waiting on it fails.
pub(crate) async fn run(
    inv: Invocation<'_>,
    output: &OutputBuffer,
    control: &TaskControl,
) -> Result<ExitStatus, PugError> {
    let result = drive(inv, output, control).await;
    control.set_pid(None);
    output.close();
    result
}

async fn drive(
    inv: Invocation<'_>,
    output: &OutputBuffer,
    control: &TaskControl,
) -> Result<ExitStatus, PugError> {
    let mut cmd = Command::new(inv.program);
    cmd.args(inv.args)
        .current_dir(&inv.cwd)
        .envs(inv.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| PugError::spawn(inv.program, &e))?;
    let pid = child.id();
    control.set_pid(pid);
    debug!(program = inv.program, pid, cwd = %inv.cwd.display(), "spawned");

    // A cancel that arrived between dequeue and spawn.
    if control.cancel_requested() {
        signal(pid, control.cancel_count());
    }

    let stdout = child.stdout.take().map(|s| tokio::spawn(pump(s, output.clone())));
    let stderr = child.stderr.take().map(|s| tokio::spawn(pump(s, output.clone())));

    let status = child
        .wait()
        .await
        .map_err(|e| PugError::io(format!("waiting on {}", inv.program), &e))?;

    for handle in [stdout, stderr].into_iter().flatten() {
        if let Err(e) = handle.await {
            warn!(error = %e, "output pump panicked");
        }
    }
    Ok(status)
}

async fn pump<R: AsyncRead + Unpin>(mut src: R, output: OutputBuffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match src.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => output.write(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "output stream read failed");
                return;
            }
        }
    }
}

/// Signals the process group led by `pid`: SIGINT on the first cancel
/// request, SIGKILL on any later one.
pub(crate) fn signal(pid: Option<u32>, cancels: u32) {
    let Some(pid) = pid else {
        return;
    };
    let sig = if cancels <= 1 {
        Signal::SIGINT
    } else {
        Signal::SIGKILL
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) => debug!(pid, signal = ?sig, "signalled process group"),
        Err(e) => debug!(pid, signal = ?sig, error = %e, "signal failed"),
    }
}

/// Runs a short-lived command outside the task engine and captures its
/// output.
///
/// # Errors
///
/// Returns [`PugError::Spawn`] if the command cannot be started and
/// [`PugError::Task`] if it exits unsuccessfully.
pub(crate) async fn capture(
    program: &str,
    args: &[&str],
    cwd: &Path,
    env: &[(String, String)],
) -> Result<Output, PugError> {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PugError::spawn(program, &e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PugError::task(format!(
            "{program} {}: {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}
