//! Lifecycle state machine for a launched process.
//!
//! A process moves from `Running` to exactly one terminal state: `Exited`
//! (normal termination, exit code set) or `Signaled` (killed, signal name
//! set). The transition is applied exactly once even under concurrent
//! waiters; later attempts are rejected so reaping stays idempotent.

use chrono::{DateTime, Utc};
use spawnkit_common::Signal;
use std::fmt;

/// Lifecycle state of a launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Process is alive.
    Running,
    /// Process terminated normally; exit code is set. Terminal.
    Exited,
    /// Process was terminated by a signal; signal name is set. Terminal.
    Signaled,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Exited => write!(f, "exited"),
            LifecycleState::Signaled => write!(f, "signaled"),
        }
    }
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Exited | LifecycleState::Signaled)
    }
}

/// State machine tracking one process from launch to termination.
#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    pid: u32,
    current: LifecycleState,
    exit_code: Option<i32>,
    signal: Option<Signal>,
    started_at: DateTime<Utc>,
    terminated_at: Option<DateTime<Utc>>,
}

impl LifecycleMachine {
    /// New machine for a process that just started running. The pid is
    /// assigned exactly once, here.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            current: LifecycleState::Running,
            exit_code: None,
            signal: None,
            started_at: Utc::now(),
            terminated_at: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> LifecycleState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Exit code; set exactly when the state is `Exited`.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Terminating signal; set exactly when the state is `Signaled`.
    pub fn signal(&self) -> Option<Signal> {
        self.signal
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }

    /// Record normal termination. Returns false if the machine already
    /// reached a terminal state; the caller must not report the exit
    /// again in that case.
    pub fn mark_exited(&mut self, code: i32) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.current = LifecycleState::Exited;
        self.exit_code = Some(code);
        self.terminated_at = Some(Utc::now());
        tracing::debug!(pid = self.pid, code, "Process exited");
        true
    }

    /// Record termination by signal. Returns false if already terminal.
    pub fn mark_signaled(&mut self, signal: Signal) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.current = LifecycleState::Signaled;
        self.signal = Some(signal);
        self.terminated_at = Some(Utc::now());
        tracing::debug!(pid = self.pid, signal = %signal, "Process killed by signal");
        true
    }

    /// Apply an already-split OS termination report. Returns false if the
    /// process was reaped before.
    pub fn mark_terminated(&mut self, code: Option<i32>, signal: Option<Signal>) -> bool {
        match (code, signal) {
            (_, Some(sig)) => self.mark_signaled(sig),
            (Some(code), None) => self.mark_exited(code),
            // An OS status that is neither is unexpected; treat it as an
            // abnormal exit so the handle still reaches a terminal state.
            (None, None) => self.mark_exited(-1),
        }
    }

    /// Time from launch to termination, while terminal.
    pub fn lifetime(&self) -> Option<chrono::Duration> {
        self.terminated_at.map(|t| t - self.started_at)
    }
}
