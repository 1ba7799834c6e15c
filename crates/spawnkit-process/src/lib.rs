//! # spawnkit-process
//!
//! Process handle, lifecycle state machine and launch manager.
//!
//! [`launch`] is the single entry point: it validates a [`LaunchSpec`],
//! plumbs the stdio configuration, creates the OS process and returns a
//! [`ChildHandle`] that exclusively owns the process and every
//! parent-side descriptor created for it. Lifecycle events are published
//! through the handle's subscription interface and fire at most once
//! each, in the documented relative order.

pub mod events;
pub mod handle;
pub mod launch;
pub mod spec;
pub mod state;
pub mod stream;

pub use events::ProcessEvent;
pub use handle::ChildHandle;
pub use launch::launch;
pub use spec::{LaunchSpec, ShellWrap};
pub use state::{LifecycleMachine, LifecycleState};
pub use stream::TrackedIo;
