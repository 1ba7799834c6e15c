//! # spawnkit
//!
//! Process execution toolkit. Launch child processes with fine-grained
//! stdio control, observe their lifecycle as an ordered event stream,
//! exchange structured messages (and OS handles) with cooperating
//! children, and aggregate output with hard byte caps. Every aggregating
//! operation exists in an async and a blocking form.
//!
//! ## Entry points
//!
//! - [`spawn`]: launch and keep a [`ChildHandle`] for streaming use
//! - [`exec`] / [`exec_file`]: run to completion, shell-wrapped or not,
//!   and collect bounded stdout/stderr
//! - [`fork`]: launch a cooperating executable with an [`IpcChannel`]
//!   pre-wired on a reserved stdio slot
//! - [`spawn_sync`] / [`exec_sync`] / [`exec_file_sync`]: blocking twins
//!   that never require an async runtime
//!
//! ```no_run
//! # async fn demo() -> spawnkit::SpawnResult<()> {
//! let result = spawnkit::exec("ls -l", spawnkit::ExecOptions::default()).await?;
//! println!("status {:?}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod options;

pub use api::{exec, exec_file, exec_file_sync, exec_sync, fork, spawn, spawn_sync};
pub use options::{ExecOptions, ForkOptions};

pub use spawnkit_capture::{capture, CaptureOptions};
pub use spawnkit_common::{
    CapturedResult, ChannelError, ChannelResult, Encoding, OutputData, Signal, SpawnError,
    SpawnResult, StreamType, DEFAULT_MAX_BUFFER,
};
pub use spawnkit_ipc::{ChannelState, IpcChannel, IpcMessage, TransferHandle};
pub use spawnkit_process::{
    launch, ChildHandle, LaunchSpec, LifecycleState, ProcessEvent, ShellWrap, TrackedIo,
};
pub use spawnkit_stdio::{ParentStream, StdioConfig, StdioSlot};
pub use spawnkit_sync::{launch_sync, SyncOptions};
