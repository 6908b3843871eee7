//! Runtime-agnostic command execution library
//!
//! This crate provides a unified interface for executing commands in the
//! contexts a reset run touches: local processes inside a checked-out
//! workspace, and processes inside a Kubernetes pod via `kubectl exec`.
//! Output is captured line by line and every execution can be bounded by a
//! timeout policy.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod event;
pub mod launcher;
pub mod layered;
pub mod process;

pub use command::Command;
pub use error::{Error, Result};
pub use event::{LogSource, ProcessEvent, ProcessEventType};
pub use launcher::Launcher;
pub use process::{ExitResult, ExitStatus, ProcessHandle};
