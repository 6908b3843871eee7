//! Layered executor implementation for runtime command composition.

use super::ExecutionLayer;
use super::layers::command_to_shell_string;
use crate::{Command, error::Result, launcher::Launcher, process::ExitResult};
use std::time::Duration;
use tracing::debug;

/// Executor that applies a series of execution layers before launching commands
pub struct LayeredExecutor<L: Launcher> {
    launcher: L,
    /// Applied in insertion order; the last layer is outermost
    layers: Vec<Box<dyn ExecutionLayer>>,
}

impl<L: Launcher> LayeredExecutor<L> {
    /// Create a new layered executor with the given launcher
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            layers: Vec::new(),
        }
    }

    /// Add an execution layer to the stack
    pub fn with_layer<Layer: ExecutionLayer + 'static>(mut self, layer: Layer) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Get the number of layers in the stack
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Get descriptions of all layers for debugging
    pub fn layer_descriptions(&self) -> Vec<String> {
        self.layers.iter().map(|layer| layer.description()).collect()
    }

    /// Apply all layers to a command without executing it
    pub fn transform(&self, command: Command) -> Result<Command> {
        self.layers
            .iter()
            .try_fold(command, |cmd, layer| layer.wrap_command(cmd))
    }

    /// Render the fully layered command line, for dry runs and logs
    pub fn render(&self, command: Command) -> Result<String> {
        command_to_shell_string(&self.transform(command)?)
    }

    /// Apply all layers, launch, and wait for completion within `timeout`
    pub async fn execute(&self, command: Command, timeout: Duration) -> Result<ExitResult> {
        let final_command = self.transform(command)?;
        debug!(layers = ?self.layer_descriptions(), "executing layered command");
        self.launcher.execute_with_timeout(final_command, timeout).await
    }
}

impl<L: Launcher> std::fmt::Debug for LayeredExecutor<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredExecutor")
            .field("layers", &self.layer_descriptions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LocalLauncher;
    use crate::layered::{KubectlExecLayer, LocalLayer};

    #[test]
    fn test_layered_executor_creation() {
        let executor = LayeredExecutor::new(LocalLauncher)
            .with_layer(LocalLayer::new())
            .with_layer(KubectlExecLayer::new("qa-sandbox", "workflow-api-0"));

        assert_eq!(executor.layer_count(), 2);
        let descriptions = executor.layer_descriptions();
        assert_eq!(descriptions[0], "Local execution");
        assert_eq!(descriptions[1], "kubectl exec in qa-sandbox/workflow-api-0");
    }

    #[test]
    fn test_render_kubectl_command() {
        let executor = LayeredExecutor::new(LocalLauncher)
            .with_layer(KubectlExecLayer::new("qa-sandbox", "workflow-api-0"));
        let rendered = executor.render(Command::shell("alembic upgrade head")).unwrap();
        assert_eq!(
            rendered,
            "kubectl exec -n qa-sandbox workflow-api-0 -- sh -c 'alembic upgrade head'"
        );
    }

    #[smol_potat::test]
    async fn test_local_execution_through_layers() {
        let dir = tempfile::tempdir().unwrap();
        let executor = LayeredExecutor::new(LocalLauncher)
            .with_layer(LocalLayer::new().with_working_dir(dir.path()).with_env("GREETING", "hi"));

        let result = executor
            .execute(Command::shell("echo $GREETING; pwd"), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.output.contains("hi"));
    }
}
