//! Worker process spawner.
//!
//! Builds the argument list for a server or client worker and spawns a
//! detached child process with its output redirected to append-mode log
//! files. Invocation is argument-list only; no shell command line is ever
//! assembled by string interpolation.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;

use tracing::{info, info_span};

use crate::config::{BackendKind, GlobalConfig};
use crate::models::worker::{WorkerDescriptor, WorkerKind};
use crate::{AppError, Result};

use super::environment::InvocationDescriptor;

/// Spawn a worker process, returning its OS process id.
///
/// The child is detached from the supervisor's process group so a signal
/// delivered to the supervisor cannot take the worker down with it. The
/// `Child` handle is dropped on purpose — the runtime reaps the process
/// when it exits, and all later control is pid-based.
///
/// # Errors
///
/// Returns `AppError::Spawn` if pre-flight validation fails or the OS
/// refuses to create the process.
pub fn launch(
    invocation: &InvocationDescriptor,
    descriptor: &WorkerDescriptor,
    config: &GlobalConfig,
) -> Result<u32> {
    let worker_id = descriptor.worker_id();
    let span = info_span!("launch", worker = %worker_id, kind = descriptor.kind.as_str());
    let _guard = span.enter();

    let log_dir = config.worker_log_dir(&worker_id);
    std::fs::create_dir_all(&log_dir)
        .map_err(|err| AppError::Spawn(format!("failed to create log dir: {err}")))?;

    let argv = build_argv(invocation, descriptor, config)?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::Spawn("empty worker argv".into()))?;

    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(append_log(&log_dir, &worker_id, "out")?)
        .stderr(append_log(&log_dir, &worker_id, "err")?);

    detach(&mut cmd);

    // Spawn through tokio so the orphaned child is still reaped when it
    // eventually exits; the handle itself is not retained.
    let child = tokio::process::Command::from(cmd)
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn worker: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Spawn("spawned worker exited before pid capture".into()))?;

    info!(pid, program, "worker process spawned");
    Ok(pid)
}

/// Assemble the full argument vector for a worker launch.
///
/// Servers against the embedded single-writer backend are invoked
/// directly with the worker config file as an argument; against a
/// server-class backend they go through the configured multi-worker
/// front-end command, since the embedded engine cannot safely be driven
/// by more than one OS process at a time. Clients are always direct with
/// fixed positional arguments.
///
/// # Errors
///
/// Returns `AppError::Spawn` if required files are missing or the
/// descriptor is incomplete.
pub fn build_argv(
    invocation: &InvocationDescriptor,
    descriptor: &WorkerDescriptor,
    config: &GlobalConfig,
) -> Result<Vec<String>> {
    match descriptor.kind {
        WorkerKind::Server => match config.backend.kind {
            BackendKind::Sqlite => {
                require_file(&config.launcher.server_entry, "server entry script")?;
                require_file(&config.launcher.server_config, "server config file")?;

                let mut argv = invocation.tokens();
                argv.push(path_arg(&config.launcher.server_entry));
                argv.push(path_arg(&config.launcher.server_config));
                Ok(argv)
            }
            // The front-end program resolves via PATH; the configured
            // command is used verbatim.
            BackendKind::Postgres => Ok(config.backend.app_server_command.clone()),
        },
        WorkerKind::Client => {
            require_file(&config.launcher.client_entry, "client entry script")?;

            let client_id = descriptor
                .client_id
                .as_deref()
                .ok_or_else(|| AppError::Spawn("client descriptor missing client_id".into()))?;
            let population_id = descriptor
                .population_id
                .as_deref()
                .ok_or_else(|| AppError::Spawn("client descriptor missing population_id".into()))?;

            let mut argv = invocation.tokens();
            argv.push(path_arg(&config.launcher.client_entry));
            argv.push(descriptor.experiment_id.clone());
            argv.push(client_id.to_owned());
            argv.push(population_id.to_owned());
            argv.push(config.backend.kind.as_arg().to_owned());
            argv.push(if descriptor.resume {
                "resume".to_owned()
            } else {
                "no-resume".to_owned()
            });
            Ok(argv)
        }
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AppError::Spawn(format!(
            "{what} does not exist: {}",
            path.display()
        )))
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn append_log(log_dir: &Path, worker_id: &str, stream: &str) -> Result<Stdio> {
    let path = log_dir.join(format!("{worker_id}.{stream}.log"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| AppError::Spawn(format!("failed to open {}: {err}", path.display())))?;
    Ok(Stdio::from(file))
}

#[cfg(unix)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;

    // New process group: a signal aimed at the supervisor's group must
    // not reach the worker. The worker still shares the supervisor's
    // session and controlling terminal, so a terminal hangup can deliver
    // SIGHUP to it; full setsid detachment needs a pre_exec hook, which
    // this crate's unsafe-code lint rules out.
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
}
