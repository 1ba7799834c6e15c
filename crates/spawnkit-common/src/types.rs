//! Shared types for process execution.

use crate::errors::SpawnError;
use std::fmt;

/// OS signal type used for kill requests and termination reporting.
///
/// Re-exported from `nix` so every crate in the workspace names signals
/// the same way (`Signal::SIGTERM`, `Signal::SIGKILL`, ...).
pub use nix::sys::signal::Signal;

/// Default per-stream cap on captured output (1 MiB).
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

/// Environment variable carrying the IPC slot number to the child.
///
/// Set by the launch manager when the stdio configuration contains an IPC
/// slot; read by `IpcChannel::from_env` on the child side.
pub const IPC_FD_ENV: &str = "SPAWNKIT_IPC_FD";

/// Which captured stream a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Stdout => write!(f, "stdout"),
            StreamType::Stderr => write!(f, "stderr"),
        }
    }
}

/// Requested representation for captured output.
///
/// `Buffer` yields raw bytes. `Utf8` (and the aliases recognized by
/// [`Encoding::named`]) yields decoded text. Any other name falls back to
/// raw bytes; callers passing arbitrary names must not assume either
/// representation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Buffer,
    Utf8,
    Named(String),
}

impl Encoding {
    /// Resolve an encoding name the way the launch options accept it.
    pub fn named(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "buffer" => Encoding::Buffer,
            "utf8" | "utf-8" | "ascii" => Encoding::Utf8,
            _ => Encoding::Named(name.to_string()),
        }
    }

    /// Whether captured bytes should be decoded to text.
    pub fn decodes_to_text(&self) -> bool {
        matches!(self, Encoding::Utf8)
    }

    /// Materialize captured bytes under this encoding.
    pub fn decode(&self, bytes: Vec<u8>) -> OutputData {
        if self.decodes_to_text() {
            OutputData::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            OutputData::Bytes(bytes)
        }
    }
}

/// Captured output, either raw bytes or decoded text depending on the
/// requested [`Encoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputData {
    Bytes(Vec<u8>),
    Text(String),
}

impl OutputData {
    pub fn empty(encoding: &Encoding) -> Self {
        encoding.decode(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            OutputData::Bytes(b) => b.len(),
            OutputData::Text(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutputData::Bytes(b) => b,
            OutputData::Text(s) => s.as_bytes(),
        }
    }

    /// Text view of the output, if it was captured as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutputData::Text(s) => Some(s),
            OutputData::Bytes(_) => None,
        }
    }
}

/// Fully materialized result of a buffered (non-streaming) launch.
///
/// `status` and `signal` are mutually exclusive: once the process has
/// terminated exactly one of them is set. `overflow` and `error` are
/// independent of the child's own exit status; a truncated capture does
/// not imply a failed process, and a launch-level error means no process
/// was ever observed.
#[derive(Debug, Clone)]
pub struct CapturedResult {
    /// Process id, if a process was created for the attempt.
    pub pid: Option<u32>,
    pub stdout: OutputData,
    pub stderr: OutputData,
    /// Exit code for a normally exited child.
    pub status: Option<i32>,
    /// Terminating signal for a killed child.
    pub signal: Option<Signal>,
    /// Which stream hit the output cap, if any. The process was killed as
    /// a side effect.
    pub overflow: Option<StreamType>,
    /// Whether the configured timeout elapsed and triggered a kill.
    pub timed_out: bool,
    /// Launch-level failure, reported without a process ever existing.
    pub error: Option<SpawnError>,
}

impl CapturedResult {
    /// Result shape for a launch that failed before a process existed.
    pub fn from_launch_error(error: SpawnError, encoding: &Encoding) -> Self {
        Self {
            pid: None,
            stdout: OutputData::empty(encoding),
            stderr: OutputData::empty(encoding),
            status: None,
            signal: None,
            overflow: None,
            timed_out: false,
            error: Some(error),
        }
    }

    /// True when the child exited normally with code 0 and the capture
    /// completed without truncation or launch error.
    pub fn success(&self) -> bool {
        self.status == Some(0) && self.error.is_none() && self.overflow.is_none()
    }
}

/// Split an OS exit status into the mutually exclusive code/signal pair.
#[cfg(unix)]
pub fn split_exit_status(status: &std::process::ExitStatus) -> (Option<i32>, Option<Signal>) {
    use std::os::unix::process::ExitStatusExt;

    if let Some(raw) = status.signal() {
        (None, Signal::try_from(raw).ok())
    } else {
        (status.code(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_resolution() {
        assert_eq!(Encoding::named("utf8"), Encoding::Utf8);
        assert_eq!(Encoding::named("UTF-8"), Encoding::Utf8);
        assert_eq!(Encoding::named("buffer"), Encoding::Buffer);
        assert_eq!(
            Encoding::named("latin1"),
            Encoding::Named("latin1".to_string())
        );
    }

    #[test]
    fn test_decode_by_encoding() {
        let text = Encoding::Utf8.decode(b"hi\n".to_vec());
        assert_eq!(text.as_text(), Some("hi\n"));

        let bytes = Encoding::Buffer.decode(b"hi\n".to_vec());
        assert_eq!(bytes.as_text(), None);
        assert_eq!(bytes.as_bytes(), b"hi\n");

        // Unrecognized names stay raw; callers must not assume a shape.
        let unknown = Encoding::named("latin1").decode(vec![0xff]);
        assert_eq!(unknown.as_bytes(), &[0xff]);
    }

    #[test]
    fn test_stream_type_display() {
        assert_eq!(StreamType::Stdout.to_string(), "stdout");
        assert_eq!(StreamType::Stderr.to_string(), "stderr");
    }
}
