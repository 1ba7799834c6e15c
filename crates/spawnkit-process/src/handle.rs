//! Parent-side handle to a launched process.

use crate::events::{EventHub, ProcessEvent};
use crate::state::{LifecycleMachine, LifecycleState};
use crate::stream::{StreamGate, TrackedIo};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::Serialize;
use spawnkit_common::{ChannelError, ChannelResult};
use spawnkit_ipc::{IpcChannel, TransferHandle};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Parent-side stream endpoints not yet claimed by a caller.
#[derive(Default)]
pub(crate) struct StreamSlots {
    pub(crate) stdin: Option<TrackedIo<ChildStdin>>,
    pub(crate) stdout: Option<TrackedIo<ChildStdout>>,
    pub(crate) stderr: Option<TrackedIo<ChildStderr>>,
    pub(crate) extra: HashMap<usize, TrackedIo<UnixStream>>,
}

/// State shared between the handle and the background tasks the launch
/// manager spawns (watcher, timeout, IPC pump).
pub(crate) struct HandleShared {
    pub(crate) machine: Mutex<LifecycleMachine>,
    pub(crate) events: EventHub,
    pub(crate) gate: Arc<StreamGate>,
    pub(crate) streams: Mutex<StreamSlots>,
    pub(crate) killed: AtomicBool,
    pub(crate) timed_out: AtomicBool,
    pub(crate) disconnect_emitted: AtomicBool,
    pub(crate) exit_notify: Notify,
}

impl HandleShared {
    pub(crate) fn new(pid: u32) -> Self {
        Self {
            machine: Mutex::new(LifecycleMachine::new(pid)),
            events: EventHub::new(),
            gate: Arc::new(StreamGate::new()),
            streams: Mutex::new(StreamSlots::default()),
            killed: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            disconnect_emitted: AtomicBool::new(false),
            exit_notify: Notify::new(),
        }
    }

    /// Emit `Disconnect` at most once across all observers of this handle.
    pub(crate) fn emit_disconnect_once(&self) {
        if !self.disconnect_emitted.swap(true, Ordering::SeqCst) {
            self.events.emit(ProcessEvent::Disconnect);
        }
    }
}

/// Handle to a running or terminated child process.
///
/// Streams are taken at most once each; lifecycle observation goes
/// through [`ChildHandle::subscribe`] or [`ChildHandle::wait`]. Dropping
/// the handle does not terminate the process.
pub struct ChildHandle {
    pid: u32,
    command: String,
    detached: bool,
    kill_signal: Signal,
    shared: Arc<HandleShared>,
    ipc: Option<IpcChannel>,
    referenced: AtomicBool,
}

impl ChildHandle {
    pub(crate) fn new(
        pid: u32,
        command: String,
        detached: bool,
        kill_signal: Signal,
        shared: Arc<HandleShared>,
        ipc: Option<IpcChannel>,
    ) -> Self {
        Self {
            pid,
            command,
            detached,
            kill_signal,
            shared,
            ipc,
            referenced: AtomicBool::new(true),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.shared.machine.lock().state()
    }

    pub fn is_terminal(&self) -> bool {
        self.shared.machine.lock().is_terminal()
    }

    /// Exit code, once the process has exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.machine.lock().exit_code()
    }

    /// Terminating signal, once the process has been signaled.
    pub fn signal(&self) -> Option<Signal> {
        self.shared.machine.lock().signal()
    }

    /// Whether termination was initiated by the launch timeout.
    pub fn timed_out(&self) -> bool {
        self.shared.timed_out.load(Ordering::SeqCst)
    }

    /// Whether [`ChildHandle::kill`] has been invoked on this handle.
    pub fn was_killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }

    /// Register an observer for lifecycle events emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent> {
        self.shared.events.subscribe()
    }

    /// Wait for termination and return `(exit_code, signal)`.
    ///
    /// Returns immediately when the process is already terminal; safe to
    /// call from any number of tasks.
    pub async fn wait(&self) -> (Option<i32>, Option<Signal>) {
        loop {
            {
                let machine = self.shared.machine.lock();
                if machine.is_terminal() {
                    return (machine.exit_code(), machine.signal());
                }
            }
            let notified = self.shared.exit_notify.notified();
            if self.shared.machine.lock().is_terminal() {
                continue;
            }
            notified.await;
        }
    }

    /// Deliver a signal to the process.
    ///
    /// A no-op returning `Ok` when the process is already terminal, and
    /// when the process disappeared between the state check and delivery.
    /// Detached processes are signaled as a group.
    pub fn kill(&self, signal: Option<Signal>) -> io::Result<()> {
        if self.is_terminal() {
            debug!(pid = self.pid, "kill on terminal process ignored");
            return Ok(());
        }
        self.shared.killed.store(true, Ordering::SeqCst);
        let sig = signal.unwrap_or(self.kill_signal);
        deliver_signal(self.pid, self.detached, sig)
    }

    /// Take ownership of the child's stdin writer. `None` when the slot
    /// was not piped or was already taken.
    pub fn take_stdin(&self) -> Option<TrackedIo<ChildStdin>> {
        self.shared.streams.lock().stdin.take()
    }

    /// Take ownership of the child's stdout reader.
    pub fn take_stdout(&self) -> Option<TrackedIo<ChildStdout>> {
        self.shared.streams.lock().stdout.take()
    }

    /// Take ownership of the child's stderr reader.
    pub fn take_stderr(&self) -> Option<TrackedIo<ChildStderr>> {
        self.shared.streams.lock().stderr.take()
    }

    /// Take ownership of the parent end of an extra pipe slot (3+).
    pub fn take_extra(&self, slot: usize) -> Option<TrackedIo<UnixStream>> {
        self.shared.streams.lock().extra.remove(&slot)
    }

    /// Whether an IPC channel was established and is still connected.
    pub fn is_connected(&self) -> bool {
        self.ipc.as_ref().is_some_and(|c| c.is_connected())
    }

    /// Send a structured message over the IPC channel. `Ok(false)` means
    /// the message was accepted but the outbound queue is saturated.
    pub fn send<T: Serialize>(&self, message: &T) -> ChannelResult<bool> {
        match &self.ipc {
            Some(channel) => channel.send(message),
            None => Err(ChannelError::Closed),
        }
    }

    /// Send a message carrying a transferable descriptor.
    pub fn send_with_handle<T: Serialize>(
        &self,
        message: &T,
        handle: TransferHandle,
    ) -> ChannelResult<bool> {
        match &self.ipc {
            Some(channel) => channel.send_with_handle(message, handle),
            None => Err(ChannelError::Closed),
        }
    }

    /// Tear down the IPC channel. Idempotent; the `Disconnect` event is
    /// emitted by the pump when the channel fully closes.
    pub fn disconnect(&self) {
        if let Some(channel) = &self.ipc {
            channel.disconnect();
        }
    }

    /// Drop this handle's claim on keeping the owning runtime busy.
    /// Bookkeeping only; background tasks always run to completion.
    pub fn unref(&self) {
        self.referenced.store(false, Ordering::SeqCst);
    }

    /// Restore the claim removed by [`ChildHandle::unref`].
    pub fn ref_(&self) {
        self.referenced.store(true, Ordering::SeqCst);
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::SeqCst)
    }

    pub(crate) fn shared(&self) -> &Arc<HandleShared> {
        &self.shared
    }
}

/// Deliver a signal, treating an already-reaped target as success.
/// Detached processes are session leaders and are signaled as a group.
pub(crate) fn deliver_signal(pid: u32, detached: bool, sig: Signal) -> io::Result<()> {
    let target = if detached {
        Pid::from_raw(-(pid as i32))
    } else {
        Pid::from_raw(pid as i32)
    };
    match signal::kill(target, sig) {
        Ok(()) => {
            debug!(pid, signal = %sig, "signal delivered");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            warn!(pid, "process gone before signal delivery");
            Ok(())
        }
        Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildHandle")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for(pid: u32) -> ChildHandle {
        ChildHandle::new(
            pid,
            "test".into(),
            false,
            Signal::SIGTERM,
            Arc::new(HandleShared::new(pid)),
            None,
        )
    }

    #[tokio::test]
    async fn test_wait_returns_after_termination() {
        let handle = handle_for(4242);
        let shared = Arc::clone(handle.shared());
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            shared.machine.lock().mark_exited(3);
            shared.exit_notify.notify_waiters();
        });
        assert_eq!(handle.wait().await, (Some(3), None));
        // Already terminal; returns immediately.
        assert_eq!(handle.wait().await, (Some(3), None));
    }

    #[tokio::test]
    async fn test_kill_after_termination_is_noop() {
        let handle = handle_for(4243);
        handle.shared().machine.lock().mark_exited(0);
        handle.kill(None).unwrap();
        assert!(!handle.was_killed());
    }

    #[test]
    fn test_send_without_channel_is_closed() {
        let handle = handle_for(4244);
        assert!(!handle.is_connected());
        assert!(matches!(
            handle.send(&serde_json::json!({"k": 1})),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn test_unref_bookkeeping() {
        let handle = handle_for(4245);
        assert!(handle.is_referenced());
        handle.unref();
        assert!(!handle.is_referenced());
        handle.ref_();
        assert!(handle.is_referenced());
    }
}
