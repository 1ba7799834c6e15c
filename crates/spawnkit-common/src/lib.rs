//! # spawnkit-common
//!
//! Shared types and error definitions for the spawnkit workspace.
//!
//! This crate provides:
//! - Error types for launch-time and channel-level failures
//! - Result type aliases used throughout the workspace
//! - Stream, signal and encoding types shared by every component

pub mod errors;
pub mod types;

pub use errors::{ChannelError, ChannelResult, SpawnError, SpawnResult};
pub use types::{
    CapturedResult, Encoding, OutputData, Signal, StreamType, DEFAULT_MAX_BUFFER, IPC_FD_ENV,
};

#[cfg(unix)]
pub use types::split_exit_status;
