//! Execution layer implementations for the contexts a reset run uses.

use crate::{Command, error::Error, error::Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Trait for execution layers that can wrap commands
pub trait ExecutionLayer: Send + Sync + std::fmt::Debug {
    /// Wrap a command with this layer's execution context
    fn wrap_command(&self, command: Command) -> Result<Command>;

    /// Get a description of this layer for debugging
    fn description(&self) -> String;
}

/// Layer for in-cluster execution - wraps commands in `kubectl exec`
///
/// The inner command's environment and working directory cannot be passed to
/// `kubectl` directly, so they are folded into the remote shell line as
/// `cd <dir> && export K=V ... && <command>`, so the variables reach every
/// stage of a pipeline and `$K` references in the command itself.
#[derive(Debug, Clone)]
pub struct KubectlExecLayer {
    /// Namespace holding the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container inside the pod (optional)
    pub container: Option<String>,
    /// kubeconfig context (optional)
    pub context: Option<String>,
    /// Working directory inside the container
    pub working_dir: Option<PathBuf>,
}

impl KubectlExecLayer {
    /// Create a new kubectl exec layer
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
            context: None,
            working_dir: None,
        }
    }

    /// Select a container inside the pod
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Use a specific kubeconfig context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the working directory inside the container
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ExecutionLayer for KubectlExecLayer {
    fn wrap_command(&self, mut command: Command) -> Result<Command> {
        let envs = command.take_envs();
        let workdir = command.take_current_dir().or_else(|| self.working_dir.clone());

        let mut kubectl = Command::new("kubectl");
        if let Some(context) = &self.context {
            kubectl.arg("--context").arg(context);
        }
        kubectl.arg("exec").arg("-n").arg(&self.namespace).arg(&self.pod);
        if let Some(container) = &self.container {
            kubectl.arg("-c").arg(container);
        }
        kubectl.arg("--");

        let mut remote_command = String::new();
        if let Some(dir) = workdir {
            remote_command.push_str(&format!("cd {} && ", shell_escape(&dir.to_string_lossy())));
        }
        if !envs.is_empty() {
            let assignments: Vec<String> = envs
                .iter()
                .map(|(key, value)| {
                    format!(
                        "{}={}",
                        key.to_string_lossy(),
                        shell_escape(&value.to_string_lossy())
                    )
                })
                .collect();
            remote_command.push_str("export ");
            remote_command.push_str(&assignments.join(" "));
            remote_command.push_str(" && ");
        }
        remote_command.push_str(&command_to_shell_string(&command)?);

        kubectl.arg("sh").arg("-c").arg(remote_command);
        Ok(kubectl)
    }

    fn description(&self) -> String {
        format!("kubectl exec in {}/{}", self.namespace, self.pod)
    }
}

/// Layer for local execution - pins working directory and environment
#[derive(Debug, Clone, Default)]
pub struct LocalLayer {
    /// Environment variables to set for local execution
    pub env: BTreeMap<String, String>,
    /// Working directory for local execution
    pub working_dir: Option<PathBuf>,
}

impl LocalLayer {
    /// Create a new local layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable for local execution
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory for local execution
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl ExecutionLayer for LocalLayer {
    fn wrap_command(&self, mut command: Command) -> Result<Command> {
        // Variables already on the command win over the layer's defaults
        let own = command.take_envs();
        command.envs(&self.env);
        command.envs(own);

        if command.get_current_dir().is_none() {
            if let Some(workdir) = &self.working_dir {
                command.current_dir(workdir);
            }
        }

        Ok(command)
    }

    fn description(&self) -> String {
        match &self.working_dir {
            Some(dir) => format!("Local execution in {}", dir.display()),
            None => "Local execution".to_string(),
        }
    }
}

/// Convert a Command to a shell-escaped string
///
/// `sh -c <script>` collapses back to `<script>` so wrapping a shell command
/// in another shell does not double-quote it.
pub fn command_to_shell_string(command: &Command) -> Result<String> {
    let program = command.get_program().to_string_lossy();
    if program.is_empty() {
        return Err(Error::InvalidCommand {
            reason: "empty program".to_string(),
        });
    }

    let args = command.get_args();
    if program == "sh" && args.len() == 2 && args[0] == "-c" {
        return Ok(args[1].to_string_lossy().to_string());
    }

    let mut parts = vec![shell_escape(&program)];
    parts.extend(args.iter().map(|arg| shell_escape(&arg.to_string_lossy())));
    Ok(parts.join(" "))
}

/// Escape a string for safe inclusion in a shell command
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~=%".contains(c)) {
        // Single quotes, with embedded single quotes closed and re-opened
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("with space"), "'with space'");
        assert_eq!(shell_escape("with'quote"), "'with'\"'\"'quote'");
        assert_eq!(shell_escape("$variable"), "'$variable'");
        assert_eq!(shell_escape("path/to/file"), "path/to/file");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_command_to_shell_string() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello world").arg("$HOME");
        assert_eq!(
            command_to_shell_string(&cmd).unwrap(),
            "echo 'hello world' '$HOME'"
        );

        let shell = Command::shell("npx prisma migrate deploy --schema prisma/schema.prisma");
        assert_eq!(
            command_to_shell_string(&shell).unwrap(),
            "npx prisma migrate deploy --schema prisma/schema.prisma"
        );
    }

    #[test]
    fn test_kubectl_layer_folds_env_and_workdir() {
        let layer = KubectlExecLayer::new("qa-sandbox", "core-api-abc")
            .with_container("app")
            .with_context("staging-cluster")
            .with_working_dir("/app");

        let mut cmd = Command::shell("npm run seed");
        cmd.env("DATABASE_URL", "postgres://u:p@db/core")
            .env("SEED_NOTE", "two words");
        let wrapped = layer.wrap_command(cmd).unwrap();

        assert_eq!(wrapped.get_program(), "kubectl");
        let args: Vec<String> = wrapped
            .get_args()
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            &args[..9],
            &[
                "--context",
                "staging-cluster",
                "exec",
                "-n",
                "qa-sandbox",
                "core-api-abc",
                "-c",
                "app",
                "--"
            ]
        );
        assert_eq!(args[9], "sh");
        assert_eq!(args[10], "-c");
        assert_eq!(
            args[11],
            "cd /app && export DATABASE_URL=postgres://u:p@db/core SEED_NOTE='two words' && npm run seed"
        );
        assert!(wrapped.get_envs().is_empty());
    }

    #[test]
    fn test_local_layer_applies_defaults() {
        let layer = LocalLayer::new()
            .with_env("NODE_ENV", "development")
            .with_working_dir("/work/core-api");

        let mut cmd = Command::new("npm");
        cmd.arg("run").arg("seed").env("NODE_ENV", "test");
        let result = layer.wrap_command(cmd).unwrap();

        assert_eq!(result.get_program(), "npm");
        assert_eq!(result.get_current_dir(), Some(std::path::Path::new("/work/core-api")));
        assert_eq!(
            result.get_envs().get(std::ffi::OsStr::new("NODE_ENV")),
            Some(&std::ffi::OsString::from("test"))
        );
    }

    #[test]
    fn test_layer_descriptions() {
        assert_eq!(
            KubectlExecLayer::new("qa-sandbox", "pod-1").description(),
            "kubectl exec in qa-sandbox/pod-1"
        );
        assert_eq!(LocalLayer::new().description(), "Local execution");
    }
}
