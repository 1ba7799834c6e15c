//! High-level entry points.
//!
//! `spawn` returns a live handle; `exec` and `exec_file` run to
//! completion and aggregate output; `fork` launches a cooperating
//! executable with an IPC channel pre-wired. Each aggregating entry
//! point has a `_sync` twin built on the blocking engine.

use crate::options::{ExecOptions, ForkOptions};
use spawnkit_capture::{capture, CaptureOptions};
use spawnkit_common::{CapturedResult, SpawnError, SpawnResult};
use spawnkit_process::{launch, ChildHandle, LaunchSpec, ShellWrap};
use spawnkit_stdio::StdioConfig;
use spawnkit_sync::{launch_sync, SyncOptions};
use tracing::debug;

/// Launch a process and return its handle. Thin wrapper over
/// [`spawnkit_process::launch`] for the common import path.
pub fn spawn(spec: LaunchSpec) -> SpawnResult<ChildHandle> {
    launch(spec)
}

/// Run a shell command line to completion and aggregate its output.
pub async fn exec(command: impl Into<String>, options: ExecOptions) -> SpawnResult<CapturedResult> {
    let spec = exec_spec(command.into(), Vec::new(), ShellWrap::Default, &options);
    run_captured(spec, &options).await
}

/// Run an executable directly, without shell interpretation, and
/// aggregate its output.
pub async fn exec_file<I, S>(
    file: impl Into<String>,
    args: I,
    options: ExecOptions,
) -> SpawnResult<CapturedResult>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args = args.into_iter().map(Into::into).collect();
    let spec = exec_spec(file.into(), args, ShellWrap::Off, &options);
    run_captured(spec, &options).await
}

/// Blocking variant of [`exec`]. Launch failures are embedded in the
/// result rather than returned as an error.
pub fn exec_sync(command: impl Into<String>, options: ExecOptions) -> CapturedResult {
    let spec = exec_spec(command.into(), Vec::new(), ShellWrap::Default, &options);
    launch_sync(spec, &sync_options(&options))
}

/// Blocking variant of [`exec_file`].
pub fn exec_file_sync<I, S>(file: impl Into<String>, args: I, options: ExecOptions) -> CapturedResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args = args.into_iter().map(Into::into).collect();
    let spec = exec_spec(file.into(), args, ShellWrap::Off, &options);
    launch_sync(spec, &sync_options(&options))
}

/// Blocking launch running the spec to completion on the calling thread.
pub fn spawn_sync(spec: LaunchSpec, options: &SyncOptions) -> CapturedResult {
    launch_sync(spec, options)
}

/// Launch a cooperating executable with an IPC channel on slot 3.
///
/// Without an explicit `exec_path` the current executable is relaunched,
/// `exec_args` first, then `args`. The child picks the channel up with
/// [`IpcChannel::from_env`](spawnkit_ipc::IpcChannel::from_env).
pub fn fork<I, S>(args: I, options: ForkOptions) -> SpawnResult<ChildHandle>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let exec_path = match &options.exec_path {
        Some(path) => path.clone(),
        None => std::env::current_exe()
            .map_err(|e| SpawnError::other("fork", format!("current executable: {}", e)))?,
    };

    let stdio = if options.silent {
        StdioConfig::piped().with_ipc()
    } else {
        StdioConfig::inherited().with_ipc()
    };

    let mut spec = LaunchSpec::new(exec_path.to_string_lossy().into_owned())
        .args(options.exec_args.iter().cloned())
        .args(args.into_iter().map(Into::into))
        .stdio(stdio);
    if let Some(cwd) = &options.cwd {
        spec = spec.current_dir(cwd.clone());
    }
    for (key, value) in &options.env {
        spec = spec.env(key.clone(), value.clone());
    }

    debug!(exec_path = %exec_path.display(), silent = options.silent, "forking");
    launch(spec)
}

fn exec_spec(
    command: String,
    args: Vec<String>,
    shell: ShellWrap,
    options: &ExecOptions,
) -> LaunchSpec {
    let mut spec = LaunchSpec::new(command)
        .args(args)
        .shell(shell)
        .stdio(StdioConfig::piped())
        .kill_signal(options.kill_signal);
    if let Some(cwd) = &options.cwd {
        spec = spec.current_dir(cwd.clone());
    }
    for (key, value) in &options.env {
        spec = spec.env(key.clone(), value.clone());
    }
    spec.clear_env = options.clear_env;
    spec.uid = options.uid;
    spec.gid = options.gid;
    spec.timeout = options.timeout;
    spec
}

async fn run_captured(spec: LaunchSpec, options: &ExecOptions) -> SpawnResult<CapturedResult> {
    let handle = launch(spec)?;
    let capture_options = CaptureOptions {
        max_buffer: options.max_buffer,
        encoding: options.encoding.clone(),
        input: options.input.clone(),
    };
    Ok(capture(&handle, &capture_options).await)
}

fn sync_options(options: &ExecOptions) -> SyncOptions {
    SyncOptions {
        input: options.input.clone(),
        max_buffer: options.max_buffer,
        encoding: options.encoding.clone(),
    }
}
