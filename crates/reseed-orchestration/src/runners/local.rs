//! Runner for services checked out under a local workspace root

use crate::{
    Error, ExecContext, Invocation, Location, Mode, Result, ServiceDescriptor, ServiceRunner,
    Target,
};
use async_trait::async_trait;
use command_executor::backends::LocalLauncher;
use command_executor::layered::{LayeredExecutor, LocalLayer, command_to_shell_string};
use command_executor::{Command, ExitResult};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Runs commands in `<root>/<service>` on this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a local runner
    pub fn new() -> Self {
        Self
    }

    fn workspace<'a>(ctx: &'a ExecContext) -> Result<&'a Path> {
        match &ctx.location {
            Location::Workspace { path } => Ok(path),
            Location::Pod { .. } => Err(Error::Other(format!(
                "{} is not located in a local workspace",
                ctx.service
            ))),
        }
    }
}

#[async_trait]
impl ServiceRunner for LocalRunner {
    async fn locate(
        &self,
        target: &Target,
        service: &ServiceDescriptor,
    ) -> Result<Option<ExecContext>> {
        let Mode::Local { root } = target.mode() else {
            return Err(Error::InvalidTarget(format!(
                "{} is not a local workspace target",
                target
            )));
        };

        let path = root.join(service.directory_name());
        match async_fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(service = %service.name, path = %path.display(), "no checkout");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Some(ExecContext {
            service: service.name.clone(),
            location: Location::Workspace { path: path.clone() },
            workdir: path,
            env_file: service.env_file.clone(),
        }))
    }

    async fn run(&self, ctx: &ExecContext, invocation: &Invocation) -> Result<ExitResult> {
        let workspace = Self::workspace(ctx)?;
        let mut command = Command::shell(&invocation.script);
        command.envs(&invocation.env);

        let executor = LayeredExecutor::new(LocalLauncher)
            .with_layer(LocalLayer::new().with_working_dir(workspace));
        Ok(executor.execute(command, invocation.timeout).await?)
    }

    fn render(&self, ctx: &ExecContext, invocation: &Invocation) -> String {
        let script = command_to_shell_string(&Command::shell(&invocation.script))
            .unwrap_or_else(|_| invocation.script.clone());
        match &ctx.location {
            Location::Workspace { path } => format!("(cd {} && {})", path.display(), script),
            Location::Pod { .. } => script,
        }
    }

    async fn read_file(
        &self,
        ctx: &ExecContext,
        path: &str,
        _timeout: Duration,
    ) -> Result<Option<String>> {
        let file = Self::workspace(ctx)?.join(path);
        match async_fs::read_to_string(&file).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(
        &self,
        ctx: &ExecContext,
        path: &str,
        content: &str,
        _timeout: Duration,
    ) -> Result<()> {
        let file = Self::workspace(ctx)?.join(path);
        async_fs::write(&file, content).await?;
        Ok(())
    }

    async fn remove_file(&self, ctx: &ExecContext, path: &str, _timeout: Duration) -> Result<()> {
        let file = Self::workspace(ctx)?.join(path);
        match async_fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllowList, ServiceCatalog, TargetResolver};

    fn local_target(root: &Path) -> Target {
        TargetResolver::new(AllowList::new(["demo"]))
            .resolve(
                "demo",
                "sandbox",
                Mode::Local {
                    root: root.to_path_buf(),
                },
            )
            .unwrap()
    }

    fn core_api() -> ServiceDescriptor {
        let config = reseed_config::parser::parse_str(reseed_config::DEFAULT_CONFIG).unwrap();
        ServiceCatalog::from_config(&config)
            .get("core-api")
            .unwrap()
            .clone()
    }

    #[smol_potat::test]
    async fn test_locate_requires_checkout() {
        let root = tempfile::tempdir().unwrap();
        let target = local_target(root.path());

        assert!(LocalRunner.locate(&target, &core_api()).await.unwrap().is_none());

        std::fs::create_dir(root.path().join("core-api")).unwrap();
        let ctx = LocalRunner.locate(&target, &core_api()).await.unwrap().unwrap();
        assert_eq!(ctx.workdir, root.path().join("core-api"));
        assert_eq!(ctx.env_file, ".env");
    }

    #[smol_potat::test]
    async fn test_run_in_workspace_with_env() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("core-api")).unwrap();
        let ctx = LocalRunner
            .locate(&local_target(root.path()), &core_api())
            .await
            .unwrap()
            .unwrap();

        let invocation =
            Invocation::new("probe", "echo \"$PROBE_VALUE\"; pwd", Duration::from_secs(10))
                .with_env("PROBE_VALUE", "ok");
        let result = LocalRunner.run(&ctx, &invocation).await.unwrap();
        assert!(result.success());
        assert!(result.output.starts_with("ok\n"));
        assert!(result.output.contains("core-api"));
    }

    #[smol_potat::test]
    async fn test_file_operations() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("core-api")).unwrap();
        let ctx = LocalRunner
            .locate(&local_target(root.path()), &core_api())
            .await
            .unwrap()
            .unwrap();
        let timeout = Duration::from_secs(5);

        assert_eq!(LocalRunner.read_file(&ctx, ".env", timeout).await.unwrap(), None);
        LocalRunner.write_file(&ctx, ".env", "A=\"1\"\n", timeout).await.unwrap();
        assert_eq!(
            LocalRunner.read_file(&ctx, ".env", timeout).await.unwrap().as_deref(),
            Some("A=\"1\"\n")
        );
        LocalRunner.remove_file(&ctx, ".env", timeout).await.unwrap();
        LocalRunner.remove_file(&ctx, ".env", timeout).await.unwrap();
        assert!(!root.path().join("core-api/.env").exists());
    }

    #[smol_potat::test]
    async fn test_remote_target_is_rejected() {
        let target = TargetResolver::new(AllowList::new(["demo"]))
            .resolve("demo", "sandbox", Mode::Remote)
            .unwrap();
        let err = LocalRunner.locate(&target, &core_api()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }
}
