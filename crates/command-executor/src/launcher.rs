//! Launcher trait for executing commands in different contexts

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::ProcessEvent;
use crate::process::{ExitResult, ProcessHandle};
use async_trait::async_trait;
use futures::stream::Stream;
use std::time::Duration;

/// A launcher that can execute commands in a specific context
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// The event stream type this launcher produces
    type EventStream: Stream<Item = ProcessEvent> + Send + Unpin;

    /// The process handle type this launcher produces
    type Handle: ProcessHandle;

    /// Launch a command, returning event stream and control handle
    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)>;

    /// Execute a command and wait for it to complete, capturing output
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        use futures::StreamExt;

        let (mut events, mut handle) = self.launch(command).await?;
        let mut output = String::new();

        // Started events carry no data and are skipped here
        while let Some(event) = events.next().await {
            if let Some(data) = &event.data {
                output.push_str(data);
                output.push('\n');
            }
        }

        let status = handle.wait().await?;
        Ok(ExitResult { status, output })
    }

    /// Execute a command, giving up after `timeout`
    ///
    /// On timeout the in-flight execution is dropped, which kills the child.
    async fn execute_with_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<ExitResult> {
        let run = self.execute(command);
        let deadline = async {
            async_io::Timer::after(timeout).await;
            Err(Error::TimedOut { after: timeout })
        };
        futures_lite::future::or(run, deadline).await
    }
}
