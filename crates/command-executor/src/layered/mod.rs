//! Layered execution system for runtime command composition.
//!
//! Layers rewrite a command before it is launched, the way a middleware stack
//! wraps a request. A command destined for a pod passes through a
//! [`KubectlExecLayer`]; a command for a local checkout passes through a
//! [`LocalLayer`] that pins its working directory and environment.
//!
//! # Example
//!
//! ```rust,no_run
//! use command_executor::layered::{LayeredExecutor, KubectlExecLayer};
//! use command_executor::{Command, backends::LocalLauncher};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = LayeredExecutor::new(LocalLauncher)
//!     .with_layer(KubectlExecLayer::new("qa-sandbox", "core-api-7d9f"));
//!
//! let command = Command::shell("npx prisma migrate deploy");
//! let result = executor.execute(command, Duration::from_secs(600)).await?;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```

mod executor;
mod layers;

pub use executor::LayeredExecutor;
pub use layers::{
    ExecutionLayer, KubectlExecLayer, LocalLayer, command_to_shell_string, shell_escape,
};
