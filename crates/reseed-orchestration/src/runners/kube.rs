//! Runner for services deployed as pods in the target namespace

use crate::{
    Error, ExecContext, Invocation, Location, Result, ServiceDescriptor, ServiceRunner, Target,
};
use async_trait::async_trait;
use command_executor::backends::LocalLauncher;
use command_executor::layered::{KubectlExecLayer, LayeredExecutor};
use command_executor::{Command, ExitResult, Launcher};
use reseed_config::{Config, resolver::render_template};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Locates pods with `kubectl get` and runs commands with `kubectl exec`
#[derive(Debug, Clone)]
pub struct KubeRunner {
    kube_context: Option<String>,
    pod_selector: String,
    container: Option<String>,
    lookup_timeout: Duration,
}

impl KubeRunner {
    /// Create a runner with a label selector template (`{service}` is substituted)
    pub fn new(pod_selector: impl Into<String>, lookup_timeout: Duration) -> Self {
        Self {
            kube_context: None,
            pod_selector: pod_selector.into(),
            container: None,
            lookup_timeout,
        }
    }

    /// Create a runner from the remote section of the configuration
    pub fn from_config(config: &Config) -> Self {
        let mut runner = Self::new(config.remote.pod_selector.clone(), config.timeouts.probe());
        runner.kube_context = config.remote.kube_context.clone();
        runner.container = config.remote.container.clone();
        runner
    }

    /// Use a specific kubeconfig context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    /// Exec into a specific container
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    fn kubectl(&self) -> Command {
        let mut command = Command::new("kubectl");
        if let Some(context) = &self.kube_context {
            command.arg("--context").arg(context);
        }
        command
    }

    fn executor(&self, ctx: &ExecContext) -> Result<LayeredExecutor<LocalLauncher>> {
        let Location::Pod { namespace, pod } = &ctx.location else {
            return Err(Error::Other(format!(
                "{} is not located in a pod",
                ctx.service
            )));
        };

        let mut layer = KubectlExecLayer::new(namespace, pod).with_working_dir(&ctx.workdir);
        if let Some(context) = &self.kube_context {
            layer = layer.with_context(context);
        }
        if let Some(container) = &self.container {
            layer = layer.with_container(container);
        }
        Ok(LayeredExecutor::new(LocalLauncher).with_layer(layer))
    }
}

#[async_trait]
impl ServiceRunner for KubeRunner {
    async fn locate(
        &self,
        target: &Target,
        service: &ServiceDescriptor,
    ) -> Result<Option<ExecContext>> {
        let namespace = target.namespace();
        let selector = render_template(&self.pod_selector, &[("service", &service.name)])?;

        let mut command = self.kubectl();
        command
            .args(["get", "pods", "-n"])
            .arg(&namespace)
            .arg("-l")
            .arg(&selector)
            .arg("--field-selector=status.phase=Running")
            .args(["-o", "jsonpath={.items[*].metadata.name}"]);

        let result = LocalLauncher
            .execute_with_timeout(command, self.lookup_timeout)
            .await?;
        if !result.success() {
            if result.output.contains("NotFound") {
                return Ok(None);
            }
            return Err(Error::Other(format!(
                "pod lookup for {} failed with {}: {}",
                service.name,
                result.status,
                result.output.trim()
            )));
        }

        // "No resources found" goes to stderr and is captured alongside the names
        let pod = result
            .output
            .lines()
            .filter(|line| !line.starts_with("No resources found"))
            .flat_map(str::split_whitespace)
            .next();

        let Some(pod) = pod else {
            debug!(service = %service.name, namespace, "no running pod");
            return Ok(None);
        };

        debug!(service = %service.name, namespace, pod, "located pod");
        Ok(Some(ExecContext {
            service: service.name.clone(),
            location: Location::Pod {
                namespace,
                pod: pod.to_string(),
            },
            workdir: PathBuf::from(&service.workdir),
            env_file: service.env_file.clone(),
        }))
    }

    async fn run(&self, ctx: &ExecContext, invocation: &Invocation) -> Result<ExitResult> {
        let mut command = Command::shell(&invocation.script);
        command.envs(&invocation.env);
        Ok(self.executor(ctx)?.execute(command, invocation.timeout).await?)
    }

    fn render(&self, ctx: &ExecContext, invocation: &Invocation) -> String {
        let command = Command::shell(&invocation.script);
        self.executor(ctx)
            .and_then(|executor| Ok(executor.render(command)?))
            .unwrap_or_else(|_| invocation.script.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecContext {
        ExecContext {
            service: "workflow-api".into(),
            location: Location::Pod {
                namespace: "qa-sandbox".into(),
                pod: "workflow-api-7d9f".into(),
            },
            workdir: PathBuf::from("/app"),
            env_file: ".env".into(),
        }
    }

    #[test]
    fn test_render_exec_command() {
        let runner =
            KubeRunner::new("app={service}", Duration::from_secs(5)).with_context("staging");
        let invocation = Invocation::new("seed", "python -m app.seed", Duration::from_secs(5))
            .with_env("DATABASE_URL", "postgres://u:secret@db/workflow");

        let rendered = runner.render(&context(), &invocation);
        assert_eq!(
            rendered,
            "kubectl --context staging exec -n qa-sandbox workflow-api-7d9f -- sh -c 'cd /app && python -m app.seed'"
        );
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_render_rejects_workspace_context() {
        let runner = KubeRunner::new("app={service}", Duration::from_secs(5));
        let ctx = ExecContext {
            location: Location::Workspace {
                path: PathBuf::from("/work/workflow-api"),
            },
            ..context()
        };
        let invocation = Invocation::new("seed", "python -m app.seed", Duration::from_secs(5));
        assert_eq!(runner.render(&ctx, &invocation), "python -m app.seed");
    }
}
