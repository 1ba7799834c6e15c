//! Process creation and the background tasks that drive a handle.
//!
//! [`launch`] turns a validated [`LaunchSpec`] into an OS process and a
//! [`ChildHandle`]. Three tasks run on the handle's behalf: the watcher
//! (reaps the process, emits `Exit` then `Close`), the optional timeout
//! (kills the process when the deadline passes) and the optional IPC
//! pump (forwards channel traffic as handle events).

use crate::events::ProcessEvent;
use crate::handle::{deliver_signal, ChildHandle, HandleShared};
use crate::spec::LaunchSpec;
use crate::stream::TrackedIo;
use spawnkit_common::{split_exit_status, SpawnError, SpawnResult, IPC_FD_ENV};
use spawnkit_ipc::{ChannelEvent, IpcChannel};
use spawnkit_stdio::{ChildAssignment, ParentEndpoint, PlumbedStdio};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Create the process described by `spec` and return its handle.
///
/// Must be called within a tokio runtime. The returned handle owns every
/// parent-side stream endpoint; claim them with the `take_*` methods
/// before awaiting, endpoints still unclaimed when the process exits are
/// discarded.
pub fn launch(spec: LaunchSpec) -> SpawnResult<ChildHandle> {
    spec.validate()?;

    let (program, args) = spec.effective_command();
    let plumbed = spec.stdio.plumb()?;

    let mut cmd = Command::new(&program);
    cmd.args(&args);
    cmd.kill_on_drop(false);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    if spec.clear_env {
        cmd.env_clear();
    }
    cmd.envs(&spec.env);
    if let Some(uid) = spec.uid {
        cmd.uid(uid);
    }
    if let Some(gid) = spec.gid {
        cmd.gid(gid);
    }
    if let Some(argv0) = &spec.argv0 {
        cmd.arg0(argv0);
    }

    // Descriptors for slots >= 3 stay open in the parent until the child
    // exists; the pre_exec closure only sees the raw numbers.
    let mut mapped: Vec<OwnedFd> = Vec::new();
    let mut mappings: Vec<(RawFd, RawFd)> = Vec::new();
    let mut parent_sockets: Vec<(usize, OwnedFd)> = Vec::new();
    let PlumbedStdio { slots, ipc } = plumbed;

    for slot in slots {
        match slot.child {
            ChildAssignment::Std(stdio) => match slot.index {
                0 => {
                    cmd.stdin(stdio);
                }
                1 => {
                    cmd.stdout(stdio);
                }
                2 => {
                    cmd.stderr(stdio);
                }
                _ => unreachable!("std assignment beyond slot 2"),
            },
            ChildAssignment::MapFd(fd) => {
                mappings.push((fd.as_raw_fd(), slot.index as RawFd));
                mapped.push(fd);
            }
        }
        if let ParentEndpoint::Socket(fd) = slot.parent {
            parent_sockets.push((slot.index, fd));
        }
    }

    if let Some(endpoint) = &ipc {
        cmd.env(IPC_FD_ENV, endpoint.slot.to_string());
    }

    let detached = spec.detached;
    unsafe {
        cmd.pre_exec(move || {
            // Restricted to async-signal-safe calls.
            if detached && nix::libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            spawnkit_stdio::apply_fd_mappings(&mut mappings)
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| SpawnError::from_spawn_io(&spec.command, &e))?;
    // Child copies are in place now; close the parent's duplicates.
    drop(mapped);

    let pid = child.id().ok_or_else(|| {
        SpawnError::other(&spec.command, "process exited before a pid was observed")
    })?;
    info!(pid, command = %spec.command, program = %program, "process launched");

    let shared = Arc::new(HandleShared::new(pid));

    {
        let mut streams = shared.streams.lock();
        if let Some(stdin) = child.stdin.take() {
            streams.stdin = Some(TrackedIo::new(stdin, Arc::clone(&shared.gate)));
        }
        if let Some(stdout) = child.stdout.take() {
            streams.stdout = Some(TrackedIo::new(stdout, Arc::clone(&shared.gate)));
        }
        if let Some(stderr) = child.stderr.take() {
            streams.stderr = Some(TrackedIo::new(stderr, Arc::clone(&shared.gate)));
        }
        for (index, fd) in parent_sockets {
            let stream = async_socket(fd)?;
            streams
                .extra
                .insert(index, TrackedIo::new(stream, Arc::clone(&shared.gate)));
        }
    }

    let channel = match ipc {
        Some(endpoint) => Some(
            IpcChannel::from_fd(endpoint.parent)
                .map_err(|e| SpawnError::stdio_setup(format!("ipc channel setup: {}", e)))?,
        ),
        None => None,
    };

    if let Some(channel) = &channel {
        if let Some(events) = channel.take_events() {
            tokio::spawn(ipc_pump(Arc::clone(&shared), events));
        }
    }

    if let Some(timeout) = spec.effective_timeout() {
        tokio::spawn(timeout_task(
            Arc::clone(&shared),
            pid,
            detached,
            spec.kill_signal,
            timeout,
        ));
    }

    tokio::spawn(watcher(Arc::clone(&shared), child));

    Ok(ChildHandle::new(
        pid,
        spec.command,
        detached,
        spec.kill_signal,
        shared,
        channel,
    ))
}

fn async_socket(fd: OwnedFd) -> SpawnResult<UnixStream> {
    let std_stream = std::os::unix::net::UnixStream::from(fd);
    std_stream
        .set_nonblocking(true)
        .and_then(|_| UnixStream::from_std(std_stream))
        .map_err(|e| SpawnError::stdio_setup(format!("stream registration: {}", e)))
}

/// Reap the process, then emit `Exit` and, once every stream endpoint
/// has drained, `Close`. Both carry the same status.
async fn watcher(shared: Arc<HandleShared>, mut child: Child) {
    let status = child.wait().await;

    let (code, signal) = match &status {
        Ok(status) => split_exit_status(status),
        Err(err) => {
            error!(error = %err, "wait on child failed");
            (Some(-1), None)
        }
    };

    let first_report = {
        let mut machine = shared.machine.lock();
        machine.mark_terminated(code, signal)
    };
    shared.exit_notify.notify_waiters();

    if first_report {
        let (code, signal) = {
            let machine = shared.machine.lock();
            (machine.exit_code(), machine.signal())
        };
        debug!(
            pid = shared.machine.lock().pid(),
            code = ?code,
            signal = ?signal.map(|s| s.to_string()),
            "process terminated"
        );
        shared.events.emit(ProcessEvent::Exit { code, signal });

        // Unclaimed endpoints will never be read; discard them so the
        // gate can reach idle.
        {
            let mut streams = shared.streams.lock();
            streams.stdin.take();
            streams.stdout.take();
            streams.stderr.take();
            streams.extra.clear();
        }
        shared.gate.wait_idle().await;
        shared.events.emit(ProcessEvent::Close { code, signal });
    }
}

/// Kill the process when the deadline passes before termination.
async fn timeout_task(
    shared: Arc<HandleShared>,
    pid: u32,
    detached: bool,
    signal: nix::sys::signal::Signal,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;
    if shared.machine.lock().is_terminal() {
        return;
    }
    shared.timed_out.store(true, Ordering::SeqCst);
    shared.killed.store(true, Ordering::SeqCst);
    warn!(pid, timeout_ms = timeout.as_millis() as u64, signal = %signal, "launch timeout expired");
    if let Err(err) = deliver_signal(pid, detached, signal) {
        error!(pid, error = %err, "timeout kill failed");
    }
}

/// Forward channel traffic as handle events. Emits `Disconnect` exactly
/// once when the channel reaches its terminal state.
async fn ipc_pump(shared: Arc<HandleShared>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Message(message) => {
                shared
                    .events
                    .emit(ProcessEvent::Message(Arc::new(message)));
            }
            ChannelEvent::Error(err) => {
                shared.events.emit(ProcessEvent::Error(err));
            }
        }
    }
    shared.emit_disconnect_once();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ShellWrap;
    use crate::state::LifecycleState;
    use spawnkit_stdio::StdioConfig;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_launch_and_wait_exit_code() {
        let spec = LaunchSpec::new("/bin/sh")
            .args(["-c", "exit 7"])
            .stdio(StdioConfig::ignored());
        let handle = launch(spec).unwrap();
        assert_eq!(handle.wait().await, (Some(7), None));
        assert_eq!(handle.state(), LifecycleState::Exited);
    }

    #[tokio::test]
    async fn test_piped_stdout_reaches_parent() {
        let spec = LaunchSpec::new("/bin/echo")
            .arg("hello")
            .stdio(StdioConfig::piped());
        let handle = launch(spec).unwrap();
        let mut stdout = handle.take_stdout().unwrap();
        drop(handle.take_stdin());
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello\n");
        assert_eq!(handle.wait().await, (Some(0), None));
    }

    #[tokio::test]
    async fn test_exit_precedes_close() {
        let spec = LaunchSpec::new("/bin/true").stdio(StdioConfig::ignored());
        let handle = launch(spec).unwrap();
        let mut events = handle.subscribe();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, ProcessEvent::Exit { code: Some(0), .. }));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, ProcessEvent::Close { code: Some(0), .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_with_signal() {
        let spec = LaunchSpec::new("/bin/sleep")
            .arg("30")
            .stdio(StdioConfig::ignored())
            .timeout(Duration::from_millis(50));
        let handle = launch(spec).unwrap();
        let (code, signal) = handle.wait().await;
        assert_eq!(code, None);
        assert_eq!(signal, Some(nix::sys::signal::Signal::SIGTERM));
        assert!(handle.timed_out());
    }

    #[tokio::test]
    async fn test_shell_wrapping() {
        let spec = LaunchSpec::new("echo wrapped")
            .shell(ShellWrap::Default)
            .stdio(StdioConfig::piped());
        let handle = launch(spec).unwrap();
        let mut stdout = handle.take_stdout().unwrap();
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "wrapped\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_maps_to_not_found() {
        let spec = LaunchSpec::new("/definitely/not/a/binary").stdio(StdioConfig::ignored());
        match launch(spec) {
            Err(SpawnError::NotFound { command }) => {
                assert_eq!(command, "/definitely/not/a/binary");
            }
            other => panic!("unexpected result: {:?}", other.map(|h| h.pid())),
        }
    }
}
