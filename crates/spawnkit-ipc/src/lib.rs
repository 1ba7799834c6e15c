//! # spawnkit-ipc
//!
//! Bidirectional structured-message transport over a reserved stdio slot.
//!
//! Messages are JSON values framed one per line over an `AF_UNIX` stream
//! socketpair. OS descriptors ride `SCM_RIGHTS` control messages alongside
//! the frame that announces them and arrive on the peer fully usable.
//! Delivery is FIFO per direction; the two directions are independent.
//!
//! The parent side is constructed by the launch manager from the plumbed
//! IPC slot. The child side calls [`IpcChannel::from_env`], which picks up
//! the descriptor number the parent exported before exec.

pub mod channel;
pub mod codec;

pub use channel::{ChannelEvent, ChannelState, IpcChannel, TransferHandle};
pub use codec::{FrameCodec, IpcMessage};
