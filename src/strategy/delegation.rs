//! Delegation / commands strategy: running user-declared commands under a
//! scoped environment.
//!
//! The environment is composed in layers: the parent process environment,
//! the resource's own `env` (tilde-expanded values), then the referenced
//! runtime's published `env` with its bin dir at the head of `PATH` (or, for
//! `toolRef`, the directory of that tool's installed binary). Commands are
//! already argv vectors by the time they reach this module; no shell is ever
//! involved.
//!
//! Subprocess output is streamed line-by-line into `Output` events.
//! Cancellation sends SIGTERM, waits out a grace period, then kills.

use crate::core::TomeiError;
use crate::engine::cancel::CancelToken;
use crate::engine::events::{Event, EventSink};
use crate::resource::ResourceId;
use crate::state::RuntimeState;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How long a signalled subprocess gets before the hard kill.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Builds the base environment: parent process env plus the resource's own
/// variables, tilde-expanded.
pub fn base_env(resource_env: &BTreeMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (key, value) in resource_env {
        env.insert(key.clone(), shellexpand::tilde(value).into_owned());
    }
    env
}

/// Prepends a directory to `PATH`.
pub fn prepend_path(env: &mut HashMap<String, String>, dir: &Path) {
    let existing = env.get("PATH").cloned().unwrap_or_default();
    let head = dir.display().to_string();
    let path = if existing.is_empty() { head } else { format!("{head}:{existing}") };
    env.insert("PATH".to_string(), path);
}

/// Overlays a runtime's published environment: its `env` map verbatim and
/// its bin dir injected at the head of `PATH`.
pub fn apply_runtime_overlay(env: &mut HashMap<String, String>, runtime: &RuntimeState) {
    for (key, value) in &runtime.env {
        env.insert(key.clone(), shellexpand::tilde(value).into_owned());
    }
    if let Some(bin_dir) = &runtime.bin_dir {
        prepend_path(env, bin_dir);
    }
}

/// Runs a command, streaming output into events; nonzero exit is an error.
pub async fn run_streaming(
    id: &ResourceId,
    argv: &[String],
    env: &HashMap<String, String>,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<(), TomeiError> {
    let outcome = run(id, argv, env, sink, cancel).await?;
    if outcome.status == 0 {
        Ok(())
    } else {
        Err(TomeiError::CommandFailed {
            resource: id.qualified(),
            command: argv.join(" "),
            status: outcome.status,
        })
    }
}

/// Runs a command and returns its trimmed stdout; nonzero exit is an error.
/// Used for `resolveVersion`.
pub async fn run_capture(
    id: &ResourceId,
    argv: &[String],
    env: &HashMap<String, String>,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<String, TomeiError> {
    let outcome = run(id, argv, env, sink, cancel).await?;
    if outcome.status == 0 {
        Ok(outcome.stdout.trim().to_string())
    } else {
        Err(TomeiError::CommandFailed {
            resource: id.qualified(),
            command: argv.join(" "),
            status: outcome.status,
        })
    }
}

/// Runs an idempotency probe: `Ok(true)` on zero exit.
pub async fn probe(
    id: &ResourceId,
    argv: &[String],
    env: &HashMap<String, String>,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<bool, TomeiError> {
    let outcome = run(id, argv, env, sink, cancel).await?;
    Ok(outcome.status == 0)
}

struct Outcome {
    status: i32,
    stdout: String,
}

async fn run(
    id: &ResourceId,
    argv: &[String],
    env: &HashMap<String, String>,
    sink: &EventSink,
    cancel: &CancelToken,
) -> Result<Outcome, TomeiError> {
    if cancel.is_cancelled() {
        return Err(TomeiError::Cancelled);
    }

    let program = which::which_in(
        &argv[0],
        env.get("PATH").map(String::as_str),
        std::env::current_dir().unwrap_or_else(|_| "/".into()),
    )
    .map_err(|_| TomeiError::CommandFailed {
        resource: id.qualified(),
        command: argv.join(" "),
        status: 127,
    })?;

    debug!(resource = %id, program = %program.display(), "spawning");
    let mut child = Command::new(&program)
        .args(&argv[1..])
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TomeiError::CommandFailed {
            resource: id.qualified(),
            command: format!("{}: {e}", argv.join(" ")),
            status: 126,
        })?;

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let stdout_task = {
        let sink = sink.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let mut captured = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                captured.push_str(&line);
                captured.push('\n');
                sink.emit(Event::Output { id: id.clone(), line });
            }
            captured
        })
    };
    let stderr_task = {
        let sink = sink.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.emit(Event::Output { id: id.clone(), line });
            }
        })
    };

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| TomeiError::CommandFailed {
            resource: id.qualified(),
            command: argv.join(" "),
            status: e.raw_os_error().unwrap_or(-1),
        })?,
        () = cancel.cancelled() => {
            terminate(&mut child, id).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(TomeiError::Cancelled);
        }
    };

    let captured = stdout_task.await.unwrap_or_default();
    let _ = stderr_task.await;

    Ok(Outcome { status: status.code().unwrap_or(-1), stdout: captured })
}

/// SIGTERM, grace period, then SIGKILL.
async fn terminate(child: &mut Child, id: &ResourceId) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(resource = %id, error = %e, "failed to signal subprocess");
        }
    }
    #[cfg(not(unix))]
    let _ = id;

    tokio::select! {
        _ = child.wait() => {}
        () = tokio::time::sleep(TERMINATION_GRACE) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
