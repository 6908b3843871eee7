//! Service runner boundary
//!
//! A runner finds where a service executes (a pod, or a checked-out
//! repository) and runs shell commands there. Everything the orchestrator does
//! to a service goes through this trait.

use crate::{Error, Result, ServiceDescriptor, Target};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use command_executor::ExitResult;
use command_executor::layered::shell_escape;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where a located service executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    /// A running pod
    Pod {
        /// Namespace holding the pod
        namespace: String,
        /// Pod name
        pod: String,
    },
    /// A local checkout
    Workspace {
        /// Service directory
        path: PathBuf,
    },
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Pod { namespace, pod } => write!(f, "pod {}/{}", namespace, pod),
            Location::Workspace { path } => write!(f, "workspace {}", path.display()),
        }
    }
}

/// Execution context of one located service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecContext {
    /// Service name
    pub service: String,
    /// Pod or workspace
    pub location: Location,
    /// Directory commands run in
    pub workdir: PathBuf,
    /// Configuration file, relative to `workdir`
    pub env_file: String,
}

/// One shell command to run in an execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Short name for logs, e.g. `migrate core`
    pub label: String,
    /// Shell script passed to `sh -c`
    pub script: String,
    /// Variables exported for this command only
    pub env: BTreeMap<String, String>,
    /// Hard limit on the command's run time
    pub timeout: Duration,
}

impl Invocation {
    /// Create an invocation
    pub fn new(label: impl Into<String>, script: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            script: script.into(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    /// Export a variable for this command
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Exit code the read script uses for a missing file
const FILE_ABSENT: i32 = 3;

/// Runs commands where services live
#[async_trait]
pub trait ServiceRunner: Send + Sync {
    /// Find the service in the target; `None` when it is not deployed or checked out
    async fn locate(
        &self,
        target: &Target,
        service: &ServiceDescriptor,
    ) -> Result<Option<ExecContext>>;

    /// Run a command in the context; a non-zero exit is a result, not an error
    async fn run(&self, ctx: &ExecContext, invocation: &Invocation) -> Result<ExitResult>;

    /// Command line `run` would execute, without variable values
    fn render(&self, ctx: &ExecContext, invocation: &Invocation) -> String;

    /// Read a file relative to the workdir; `None` when it does not exist
    async fn read_file(
        &self,
        ctx: &ExecContext,
        path: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let path = shell_escape(path);
        let script = format!(
            "if [ -f {0} ]; then base64 < {0}; else exit {1}; fi",
            path, FILE_ABSENT
        );
        let result = self
            .run(ctx, &Invocation::new("read config", script, timeout))
            .await?;

        if result.status.code == Some(FILE_ABSENT) {
            return Ok(None);
        }
        if !result.success() {
            return Err(Error::Other(format!(
                "reading {} failed with {}",
                path, result.status
            )));
        }

        let encoded: String = result.output.split_whitespace().collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Other(format!("reading {}: {}", path, e)))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::Other(format!("reading {}: {}", path, e)))
    }

    /// Write a file relative to the workdir, replacing it
    async fn write_file(
        &self,
        ctx: &ExecContext,
        path: &str,
        content: &str,
        timeout: Duration,
    ) -> Result<()> {
        let script = format!(
            "printf %s '{}' | base64 -d > {}",
            STANDARD.encode(content),
            shell_escape(path)
        );
        let result = self
            .run(ctx, &Invocation::new("write config", script, timeout))
            .await?;
        if !result.success() {
            return Err(Error::Other(format!(
                "writing {} failed with {}",
                path, result.status
            )));
        }
        Ok(())
    }

    /// Remove a file relative to the workdir; absent files are fine
    async fn remove_file(&self, ctx: &ExecContext, path: &str, timeout: Duration) -> Result<()> {
        let script = format!("rm -f {}", shell_escape(path));
        let result = self
            .run(ctx, &Invocation::new("remove config", script, timeout))
            .await?;
        if !result.success() {
            return Err(Error::Other(format!(
                "removing {} failed with {}",
                path, result.status
            )));
        }
        Ok(())
    }
}
