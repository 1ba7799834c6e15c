//! Translation of a [`StdioConfig`] into concrete handle assignments.
//!
//! Plumbing happens before process creation. For slots 0..=2 the child
//! side is a ready-made [`std::process::Stdio`]; slots 3 and above produce
//! a descriptor the launch manager maps into place (`dup2`) between fork
//! and exec. Parent-side endpoints are returned alongside so the process
//! handle can take ownership of every descriptor the library keeps.

use crate::config::{StdioConfig, StdioSlot};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use spawnkit_common::{SpawnError, SpawnResult};
use std::fs::OpenOptions;
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::process::Stdio;
use tracing::debug;

/// Child-side assignment for one slot.
pub enum ChildAssignment {
    /// Handed to the spawn call directly (slots 0..=2).
    Std(Stdio),
    /// Mapped into the target slot with `dup2` before exec (slots >= 3).
    /// The descriptor is closed in the parent once the child exists.
    MapFd(OwnedFd),
}

/// Parent-side endpoint for one slot.
pub enum ParentEndpoint {
    /// Nothing kept in the parent (ignore, inherit, dup, raw fd).
    None,
    /// A pipe end surfaced by the spawn call itself (piped slots 0..=2).
    ChildStd,
    /// Parent end of the socketpair backing an extra pipe slot.
    Socket(OwnedFd),
}

/// One plumbed slot: the child assignment and the parent endpoint.
pub struct PlumbedSlot {
    pub index: usize,
    pub child: ChildAssignment,
    pub parent: ParentEndpoint,
}

/// Parent end of the IPC socketpair and the slot it occupies in the child.
pub struct IpcEndpoint {
    pub slot: usize,
    pub parent: OwnedFd,
}

/// Result of plumbing a full configuration.
pub struct PlumbedStdio {
    pub slots: Vec<PlumbedSlot>,
    pub ipc: Option<IpcEndpoint>,
}

impl StdioConfig {
    /// Produce concrete handle assignments for this configuration.
    ///
    /// Validation runs first; an invalid configuration is rejected before
    /// any descriptor is created, so there is no partial allocation to
    /// unwind.
    pub fn plumb(&self) -> SpawnResult<PlumbedStdio> {
        self.validate()?;

        let mut slots = Vec::with_capacity(self.slots().len());
        let mut ipc = None;

        for (index, slot) in self.slots().iter().enumerate() {
            let is_std = index <= 2;
            let plumbed = match slot {
                StdioSlot::Pipe if is_std => PlumbedSlot {
                    index,
                    child: ChildAssignment::Std(Stdio::piped()),
                    parent: ParentEndpoint::ChildStd,
                },
                StdioSlot::Pipe => {
                    // Extra pipe slots are duplex socketpairs; the parent
                    // end is surfaced as an async stream by the handle.
                    let (parent, child) = new_socketpair()?;
                    PlumbedSlot {
                        index,
                        child: ChildAssignment::MapFd(child),
                        parent: ParentEndpoint::Socket(parent),
                    }
                }
                StdioSlot::Ignore if is_std => PlumbedSlot {
                    index,
                    child: ChildAssignment::Std(Stdio::null()),
                    parent: ParentEndpoint::None,
                },
                StdioSlot::Ignore => PlumbedSlot {
                    index,
                    child: ChildAssignment::MapFd(open_null()?),
                    parent: ParentEndpoint::None,
                },
                StdioSlot::Inherit if is_std => PlumbedSlot {
                    index,
                    child: ChildAssignment::Std(Stdio::inherit()),
                    parent: ParentEndpoint::None,
                },
                StdioSlot::Inherit => {
                    // Extra inherited slots keep the parent's descriptor
                    // number in the child.
                    let fd = dup_raw(index as RawFd)?;
                    PlumbedSlot {
                        index,
                        child: ChildAssignment::MapFd(fd),
                        parent: ParentEndpoint::None,
                    }
                }
                StdioSlot::Ipc => {
                    let (parent, child) = new_socketpair()?;
                    ipc = Some(IpcEndpoint {
                        slot: index,
                        parent,
                    });
                    let child = if is_std {
                        ChildAssignment::Std(Stdio::from(child))
                    } else {
                        ChildAssignment::MapFd(child)
                    };
                    PlumbedSlot {
                        index,
                        child,
                        parent: ParentEndpoint::None,
                    }
                }
                StdioSlot::Dup(stream) => {
                    let fd = dup_raw(stream.raw_fd())?;
                    PlumbedSlot {
                        index,
                        child: assignment_for(fd, is_std),
                        parent: ParentEndpoint::None,
                    }
                }
                StdioSlot::Fd(raw) => {
                    // Duplicate rather than steal: the caller keeps its
                    // descriptor open.
                    let fd = dup_raw(*raw)?;
                    PlumbedSlot {
                        index,
                        child: assignment_for(fd, is_std),
                        parent: ParentEndpoint::None,
                    }
                }
            };
            slots.push(plumbed);
        }

        debug!(
            slot_count = slots.len(),
            ipc_slot = ipc.as_ref().map(|e| e.slot),
            "Stdio configuration plumbed"
        );

        Ok(PlumbedStdio { slots, ipc })
    }
}

/// Map descriptors into their target slots and clear close-on-exec on
/// the result. Runs between fork and exec; restricted to
/// async-signal-safe calls.
///
/// A mapping's target slot may still hold the source of a later mapping;
/// that source is relocated above the highest target before the slot is
/// overwritten, which is why the list is taken mutably.
pub fn apply_fd_mappings(mappings: &mut [(RawFd, RawFd)]) -> std::io::Result<()> {
    let max_target = mappings.iter().map(|&(_, t)| t).max().unwrap_or(0);
    for i in 0..mappings.len() {
        let (src, target) = mappings[i];
        if src == target {
            // dup2 would be a no-op; just clear close-on-exec.
            let flags = unsafe { nix::libc::fcntl(src, nix::libc::F_GETFD) };
            if flags < 0 {
                return Err(std::io::Error::last_os_error());
            }
            let cleared = flags & !nix::libc::FD_CLOEXEC;
            if unsafe { nix::libc::fcntl(src, nix::libc::F_SETFD, cleared) } < 0 {
                return Err(std::io::Error::last_os_error());
            }
            continue;
        }
        for j in (i + 1)..mappings.len() {
            if mappings[j].0 == target {
                let moved =
                    unsafe { nix::libc::fcntl(target, nix::libc::F_DUPFD_CLOEXEC, max_target + 1) };
                if moved < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                mappings[j].0 = moved;
            }
        }
        if unsafe { nix::libc::dup2(src, target) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn assignment_for(fd: OwnedFd, is_std: bool) -> ChildAssignment {
    if is_std {
        ChildAssignment::Std(Stdio::from(fd))
    } else {
        ChildAssignment::MapFd(fd)
    }
}

/// Unix socketpair, close-on-exec in the parent. The child copy loses the
/// flag when it is mapped into its target slot.
fn new_socketpair() -> SpawnResult<(OwnedFd, OwnedFd)> {
    socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(|e| SpawnError::stdio_setup(format!("socketpair failed: {}", e)))
}

fn open_null() -> SpawnResult<OwnedFd> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map(OwnedFd::from)
        .map_err(|e| SpawnError::stdio_setup(format!("failed to open /dev/null: {}", e)))
}

fn dup_raw(fd: RawFd) -> SpawnResult<OwnedFd> {
    // Safety: the descriptor is only borrowed for the duration of the dup.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed
        .try_clone_to_owned()
        .map_err(|e| SpawnError::stdio_setup(format!("failed to duplicate fd {}: {}", fd, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParentStream;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_plumb_default_config() {
        let plumbed = StdioConfig::default().plumb().unwrap();
        assert_eq!(plumbed.slots.len(), 3);
        assert!(plumbed.ipc.is_none());
        for slot in &plumbed.slots {
            assert!(matches!(slot.parent, ParentEndpoint::ChildStd));
            assert!(matches!(slot.child, ChildAssignment::Std(_)));
        }
    }

    #[test]
    fn test_plumb_ipc_slot() {
        let plumbed = StdioConfig::piped().with_ipc().plumb().unwrap();
        assert_eq!(plumbed.slots.len(), 4);
        let ipc = plumbed.ipc.expect("ipc endpoint");
        assert_eq!(ipc.slot, 3);
        assert!(ipc.parent.as_raw_fd() >= 0);
        assert!(matches!(
            plumbed.slots[3].child,
            ChildAssignment::MapFd(_)
        ));
    }

    #[test]
    fn test_plumb_rejects_invalid_before_allocating() {
        let config = StdioConfig::from_slots(vec![StdioSlot::Pipe]);
        assert!(config.plumb().is_err());
    }

    #[test]
    fn test_plumb_extra_pipe_is_socketpair() {
        let config = StdioConfig::from_slots(vec![
            StdioSlot::Ignore,
            StdioSlot::Ignore,
            StdioSlot::Ignore,
            StdioSlot::Pipe,
        ]);
        let plumbed = config.plumb().unwrap();
        assert!(matches!(
            plumbed.slots[3].parent,
            ParentEndpoint::Socket(_)
        ));
    }

    #[test]
    fn test_plumb_dup_parent_stream() {
        let config = StdioConfig::from_slots(vec![
            StdioSlot::Ignore,
            StdioSlot::Dup(ParentStream::Stderr),
            StdioSlot::Inherit,
        ]);
        let plumbed = config.plumb().unwrap();
        assert!(matches!(plumbed.slots[1].child, ChildAssignment::Std(_)));
        assert!(matches!(plumbed.slots[1].parent, ParentEndpoint::None));
    }
}
