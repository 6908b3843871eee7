//! Backend implementations for different execution contexts
//!
//! Every context a reset run reaches (a local checkout, a pod) is ultimately a
//! local process: remote contexts are expressed as layers that rewrite the
//! command (see [`crate::layered`]) before [`LocalLauncher`] spawns it.

pub mod local;

pub use local::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
