//! # spawnkit-stdio
//!
//! Stdio slot configuration and OS-level plumbing.
//!
//! A [`StdioConfig`] describes what each numbered I/O channel of a child
//! process should be connected to. [`StdioConfig::plumb`] turns that
//! description into concrete per-slot handle assignments for the child and
//! a parallel list of parent-side endpoints, without spawning anything.
//! Validation is fail-fast: no OS resource is created for an invalid
//! configuration.

pub mod config;
pub mod plumbing;

pub use config::{ParentStream, StdioConfig, StdioSlot};
pub use plumbing::{
    apply_fd_mappings, ChildAssignment, IpcEndpoint, ParentEndpoint, PlumbedSlot, PlumbedStdio,
};
