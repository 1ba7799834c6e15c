//! # spawnkit-sync
//!
//! Blocking execution engine. Runs a [`LaunchSpec`] to completion on the
//! calling thread and returns a fully aggregated [`CapturedResult`];
//! launch failures are embedded in the result instead of being returned
//! as an error, so callers always get the captured state.
//!
//! Built on `std::process` and plain threads so it works without any
//! async runtime. Timeout enforcement polls the child at a fixed
//! interval; output streams are drained by one thread each, against the
//! same per-stream cap the async aggregator uses.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use spawnkit_common::{
    CapturedResult, Encoding, SpawnError, SpawnResult, StreamType, DEFAULT_MAX_BUFFER,
};
use spawnkit_process::LaunchSpec;
use spawnkit_stdio::{ChildAssignment, PlumbedStdio, StdioSlot};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between termination checks while blocking.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

const READ_CHUNK: usize = 8 * 1024;

/// Parameters of a blocking run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Bytes written to the child's stdin before it is closed.
    pub input: Option<Vec<u8>>,
    /// Per-stream byte cap.
    pub max_buffer: usize,
    /// Decoding applied to both aggregated streams.
    pub encoding: Encoding,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            input: None,
            max_buffer: DEFAULT_MAX_BUFFER,
            encoding: Encoding::Buffer,
        }
    }
}

impl SyncOptions {
    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Run the process to completion, blocking the calling thread.
///
/// Never panics on launch failure: a spec that cannot be validated or a
/// process that cannot be created yields a result whose `error` field
/// carries the failure and whose remaining fields are empty.
pub fn launch_sync(spec: LaunchSpec, options: &SyncOptions) -> CapturedResult {
    match run(spec, options) {
        Ok(result) => result,
        Err(error) => CapturedResult::from_launch_error(error, &options.encoding),
    }
}

fn run(spec: LaunchSpec, options: &SyncOptions) -> SpawnResult<CapturedResult> {
    spec.validate()?;
    if spec.stdio.slots().iter().any(|s| matches!(s, StdioSlot::Ipc)) {
        return Err(SpawnError::invalid_spec(
            "ipc slots require asynchronous launch",
        ));
    }

    let (program, args) = spec.effective_command();
    let plumbed = spec.stdio.plumb()?;

    let mut cmd = Command::new(&program);
    cmd.args(&args);
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

    let mut mapped: Vec<OwnedFd> = Vec::new();
    let mut mappings: Vec<(RawFd, RawFd)> = Vec::new();
    let PlumbedStdio { slots, ipc: _ } = plumbed;
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
        // There is no caller to hand extra parent endpoints to in a
        // blocking run; dropping them closes the pipe.
        drop(slot.parent);
    }

    let detached = spec.detached;
    unsafe {
        cmd.pre_exec(move || {
            if detached && nix::libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            spawnkit_stdio::apply_fd_mappings(&mut mappings)
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| SpawnError::from_spawn_io(&spec.command, &e))?;
    drop(mapped);

    let pid = child.id();
    debug!(pid, command = %spec.command, "blocking launch");

    let killed = Arc::new(AtomicBool::new(false));

    let writer = child.stdin.take().map(|mut stdin| {
        let input = options.input.clone().unwrap_or_default();
        thread::spawn(move || {
            if let Err(err) = stdin.write_all(&input) {
                debug!(error = %err, "stdin write cut short");
            }
            // Dropping closes the pipe so the child sees end-of-stream.
        })
    });

    let stdout = child.stdout.take().map(|reader| {
        spawn_reader(
            reader,
            options.max_buffer,
            StreamType::Stdout,
            pid,
            detached,
            spec.kill_signal,
            Arc::clone(&killed),
        )
    });
    let stderr = child.stderr.take().map(|reader| {
        spawn_reader(
            reader,
            options.max_buffer,
            StreamType::Stderr,
            pid,
            detached,
            spec.kill_signal,
            Arc::clone(&killed),
        )
    });

    let (status, timed_out) = poll_until_exit(
        &mut child,
        spec.effective_timeout(),
        detached,
        spec.kill_signal,
        &killed,
    )?;

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let (stdout_bytes, stdout_overflow) = join_reader(stdout);
    let (stderr_bytes, stderr_overflow) = join_reader(stderr);

    let (code, signal) = spawnkit_common::split_exit_status(&status);
    let overflow = if stdout_overflow {
        Some(StreamType::Stdout)
    } else if stderr_overflow {
        Some(StreamType::Stderr)
    } else {
        None
    };

    Ok(CapturedResult {
        pid: Some(pid),
        stdout: options.encoding.decode(stdout_bytes),
        stderr: options.encoding.decode(stderr_bytes),
        status: code,
        signal,
        overflow,
        timed_out,
        error: None,
    })
}

/// Poll for termination, enforcing the optional deadline.
fn poll_until_exit(
    child: &mut Child,
    timeout: Option<Duration>,
    detached: bool,
    kill_signal: Signal,
    killed: &AtomicBool,
) -> SpawnResult<(std::process::ExitStatus, bool)> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut timed_out = false;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((status, timed_out)),
            Ok(None) => {}
            Err(err) => {
                return Err(SpawnError::other(
                    "wait",
                    format!("failed to poll child: {}", err),
                ))
            }
        }
        if let Some(deadline) = deadline {
            if !timed_out && Instant::now() >= deadline {
                timed_out = true;
                killed.store(true, Ordering::SeqCst);
                warn!(pid = child.id(), signal = %kill_signal, "deadline expired, killing process");
                send_signal(child.id(), detached, kill_signal);
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    max_buffer: usize,
    stream: StreamType,
    pid: u32,
    detached: bool,
    kill_signal: Signal,
    killed: Arc<AtomicBool>,
) -> thread::JoinHandle<(Vec<u8>, bool)> {
    thread::spawn(move || {
        let mut collected = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return (collected, false),
                Ok(n) => {
                    collected.extend_from_slice(&chunk[..n]);
                    if collected.len() > max_buffer {
                        collected.truncate(max_buffer);
                        warn!(pid, stream = %stream, max_buffer, "output cap exceeded, killing process");
                        if !killed.swap(true, Ordering::SeqCst) {
                            send_signal(pid, detached, kill_signal);
                        }
                        return (collected, true);
                    }
                }
                Err(err) => {
                    debug!(pid, stream = %stream, error = %err, "stream read ended");
                    return (collected, false);
                }
            }
        }
    })
}

fn join_reader(handle: Option<thread::JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => (Vec::new(), false),
    }
}

/// Best-effort delivery; a process that died on its own is not an error.
fn send_signal(pid: u32, detached: bool, sig: Signal) {
    let target = if detached {
        Pid::from_raw(-(pid as i32))
    } else {
        Pid::from_raw(pid as i32)
    };
    if let Err(errno) = signal::kill(target, sig) {
        if errno != nix::errno::Errno::ESRCH {
            warn!(pid, error = %errno, "signal delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnkit_stdio::StdioConfig;

    fn piped(command: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec::new(command)
            .args(args.iter().copied())
            .stdio(StdioConfig::piped())
    }

    #[test]
    fn test_exit_status_captured() {
        let result = launch_sync(piped("/bin/false", &[]), &SyncOptions::default());
        assert_eq!(result.status, Some(1));
        assert_eq!(result.signal, None);
        assert!(result.error.is_none());
        assert!(!result.success());
    }

    #[test]
    fn test_output_and_input() {
        let options = SyncOptions::default().input("round trip");
        let result = launch_sync(piped("/bin/cat", &[]), &options);
        assert_eq!(result.stdout.as_bytes(), b"round trip");
        assert_eq!(result.status, Some(0));
        assert!(result.success());
    }

    #[test]
    fn test_launch_failure_is_embedded() {
        let result = launch_sync(
            piped("/definitely/not/a/binary", &[]),
            &SyncOptions::default(),
        );
        assert!(matches!(result.error, Some(SpawnError::NotFound { .. })));
        assert_eq!(result.pid, None);
        assert_eq!(result.status, None);
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_ipc_slot_rejected() {
        let spec = LaunchSpec::new("/bin/true").stdio(StdioConfig::piped().with_ipc());
        let result = launch_sync(spec, &SyncOptions::default());
        assert!(matches!(result.error, Some(SpawnError::InvalidSpec { .. })));
    }

    #[test]
    fn test_timeout_kills() {
        let spec = piped("/bin/sleep", &["30"]).timeout(Duration::from_millis(60));
        let start = Instant::now();
        let result = launch_sync(spec, &SyncOptions::default());
        assert!(result.timed_out);
        assert_eq!(result.status, None);
        assert_eq!(result.signal, Some(Signal::SIGTERM));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_overflow_truncates() {
        let options = SyncOptions::default().max_buffer(512);
        let result = launch_sync(piped("/bin/sh", &["-c", "yes x"]), &options);
        assert_eq!(result.overflow, Some(StreamType::Stdout));
        assert_eq!(result.stdout.len(), 512);
    }

    #[test]
    fn test_stderr_capture_with_encoding() {
        let options = SyncOptions::default().encoding(Encoding::Utf8);
        let result = launch_sync(
            piped("/bin/sh", &["-c", "echo oops >&2; exit 2"]),
            &options,
        );
        assert_eq!(result.stderr.as_text(), Some("oops\n"));
        assert_eq!(result.status, Some(2));
    }
}
