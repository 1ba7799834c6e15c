//! Stdio slot descriptors and configuration validation.

use spawnkit_common::{SpawnError, SpawnResult};
use std::os::fd::RawFd;

/// One of the parent's own standard streams, used by [`StdioSlot::Dup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentStream {
    Stdin,
    Stdout,
    Stderr,
}

impl ParentStream {
    pub fn raw_fd(self) -> RawFd {
        match self {
            ParentStream::Stdin => 0,
            ParentStream::Stdout => 1,
            ParentStream::Stderr => 2,
        }
    }
}

/// Descriptor for one stdio slot of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioSlot {
    /// Create an OS pipe; the library owns the parent-side end.
    Pipe,
    /// Connect the slot to the null sink.
    Ignore,
    /// Share the parent's corresponding descriptor.
    Inherit,
    /// Reserve the slot for the structured-message IPC channel.
    /// At most one per configuration.
    Ipc,
    /// Duplicate one of the parent's standard streams into the slot.
    Dup(ParentStream),
    /// Duplicate an arbitrary open descriptor into the slot.
    Fd(RawFd),
}

/// Ordered stdio configuration for a child process.
///
/// Slots 0/1/2 conventionally map to stdin/stdout/stderr; additional slots
/// are opaque pass-through channels. A configuration always carries at
/// least three slots and at most one [`StdioSlot::Ipc`] slot; both rules
/// are checked by [`StdioConfig::validate`] before any OS resource is
/// created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioConfig {
    slots: Vec<StdioSlot>,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self::piped()
    }
}

impl StdioConfig {
    /// stdin/stdout/stderr all piped.
    pub fn piped() -> Self {
        Self {
            slots: vec![StdioSlot::Pipe; 3],
        }
    }

    /// stdin/stdout/stderr all shared with the parent.
    pub fn inherited() -> Self {
        Self {
            slots: vec![StdioSlot::Inherit; 3],
        }
    }

    /// stdin/stdout/stderr all connected to the null sink.
    pub fn ignored() -> Self {
        Self {
            slots: vec![StdioSlot::Ignore; 3],
        }
    }

    /// Build a configuration from explicit slot descriptors.
    ///
    /// The slot count is validated by [`StdioConfig::validate`] (and by
    /// the launch manager before spawning), not here.
    pub fn from_slots(slots: Vec<StdioSlot>) -> Self {
        Self { slots }
    }

    /// Append an IPC slot after the existing slots.
    pub fn with_ipc(mut self) -> Self {
        self.slots.push(StdioSlot::Ipc);
        self
    }

    pub fn slots(&self) -> &[StdioSlot] {
        &self.slots
    }

    /// Index of the IPC slot, if one is configured.
    pub fn ipc_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, StdioSlot::Ipc))
    }

    /// Check the structural rules of the configuration.
    pub fn validate(&self) -> SpawnResult<()> {
        if self.slots.len() < 3 {
            return Err(SpawnError::invalid_spec(format!(
                "stdio configuration needs at least 3 slots, got {}",
                self.slots.len()
            )));
        }

        let ipc_count = self
            .slots
            .iter()
            .filter(|s| matches!(s, StdioSlot::Ipc))
            .count();
        if ipc_count > 1 {
            return Err(SpawnError::invalid_spec(format!(
                "stdio configuration allows at most one IPC slot, got {}",
                ipc_count
            )));
        }

        for slot in &self.slots {
            if let StdioSlot::Fd(fd) = slot {
                if *fd < 0 {
                    return Err(SpawnError::invalid_spec(format!(
                        "invalid raw descriptor {} in stdio configuration",
                        fd
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_three_pipes() {
        let config = StdioConfig::default();
        assert_eq!(config.slots(), &[StdioSlot::Pipe; 3]);
        assert!(config.validate().is_ok());
        assert_eq!(config.ipc_slot(), None);
    }

    #[test]
    fn test_too_few_slots_rejected() {
        let config = StdioConfig::from_slots(vec![StdioSlot::Pipe, StdioSlot::Pipe]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_ipc_rejected() {
        let config = StdioConfig::piped().with_ipc().with_ipc();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at most one IPC slot"));
    }

    #[test]
    fn test_ipc_slot_position() {
        let config = StdioConfig::piped().with_ipc();
        assert_eq!(config.ipc_slot(), Some(3));
    }

    #[test]
    fn test_negative_fd_rejected() {
        let config = StdioConfig::from_slots(vec![
            StdioSlot::Pipe,
            StdioSlot::Fd(-1),
            StdioSlot::Pipe,
        ]);
        assert!(config.validate().is_err());
    }
}
