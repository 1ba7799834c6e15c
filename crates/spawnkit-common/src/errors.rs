//! Error types for the spawnkit workspace.
//!
//! Launch-time failures (`SpawnError`) happen before a usable process handle
//! exists and are returned directly to the caller. Channel-level failures
//! (`ChannelError`) happen while a process is alive and are surfaced through
//! the handle's event stream without disturbing the process lifecycle.

use thiserror::Error;

/// Result type for launch operations.
pub type SpawnResult<T> = std::result::Result<T, SpawnError>;

/// Result type for IPC channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Launch-time error. A value of this type means no process was created
/// for the attempt; it is never delivered as an exit status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("Executable not found: {command}")]
    NotFound { command: String },

    #[error("Permission denied: {command}")]
    PermissionDenied { command: String },

    #[error("Resource exhaustion while spawning {command}: {reason}")]
    ResourceExhausted { command: String, reason: String },

    #[error("Invalid launch spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("Stdio setup failed: {reason}")]
    StdioSetup { reason: String },

    #[error("Spawn failed: {command} - {reason}")]
    Other { command: String, reason: String },
}

impl SpawnError {
    pub fn not_found(command: impl Into<String>) -> Self {
        Self::NotFound {
            command: command.into(),
        }
    }

    pub fn permission_denied(command: impl Into<String>) -> Self {
        Self::PermissionDenied {
            command: command.into(),
        }
    }

    pub fn resource_exhausted(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    pub fn stdio_setup(reason: impl Into<String>) -> Self {
        Self::StdioSetup {
            reason: reason.into(),
        }
    }

    pub fn other(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Other {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Classify an OS-level spawn failure for the given command.
    pub fn from_spawn_io(command: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::not_found(command),
            ErrorKind::PermissionDenied => Self::permission_denied(command),
            ErrorKind::OutOfMemory => Self::resource_exhausted(command, err.to_string()),
            _ => match err.raw_os_error() {
                // EAGAIN / EMFILE / ENFILE: process table or descriptor table full
                Some(libc_errno @ (11 | 24 | 23)) => Self::ResourceExhausted {
                    command: command.to_string(),
                    reason: format!("os error {}: {}", libc_errno, err),
                },
                _ => Self::other(command, err.to_string()),
            },
        }
    }
}

/// IPC channel failure while a process is alive. Surfaced as an `Error`
/// event on the owning handle; the process lifecycle continues
/// independently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("IPC channel is closed")]
    Closed,

    #[error("IPC message could not be encoded: {reason}")]
    Encode { reason: String },

    #[error("IPC message could not be decoded: {reason}")]
    Decode { reason: String },

    #[error("IPC transport failure: {reason}")]
    Transport { reason: String },
}

impl ChannelError {
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_spawn_error_construction() {
        let err = SpawnError::not_found("/no/such/bin");
        assert!(matches!(err, SpawnError::NotFound { .. }));
        assert_eq!(err.to_string(), "Executable not found: /no/such/bin");
    }

    #[test]
    fn test_spawn_io_classification() {
        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            SpawnError::from_spawn_io("cmd", &err),
            SpawnError::NotFound { .. }
        ));

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            SpawnError::from_spawn_io("cmd", &err),
            SpawnError::PermissionDenied { .. }
        ));

        let err = io::Error::from_raw_os_error(24); // EMFILE
        assert!(matches!(
            SpawnError::from_spawn_io("cmd", &err),
            SpawnError::ResourceExhausted { .. }
        ));
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::Closed;
        assert_eq!(err.to_string(), "IPC channel is closed");

        let err = ChannelError::transport("broken pipe");
        assert!(err.to_string().contains("broken pipe"));
    }
}
