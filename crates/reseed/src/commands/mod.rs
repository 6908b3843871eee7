pub mod check;
pub mod plan;
pub mod reset;

use crate::{EXIT_REFUSED, TargetArgs};
use anyhow::{Context, Result};
use reseed_config::Config;
use reseed_orchestration::{
    CommandCredentialProvider, CredentialProvider, KubeRunner, LocalRunner, Mode, RunPlan,
    ServiceCatalog, ServiceRunner, StaticCredentialProvider, Target, TargetResolver,
};
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs to act on one target
pub struct Session {
    pub config: Config,
    pub target: Target,
    pub plan: RunPlan,
    pub provider: Arc<dyn CredentialProvider>,
    pub runner: Arc<dyn ServiceRunner>,
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load built-in configuration".to_string(),
    })
}

/// Load configuration, resolve the target and build the plan; no I/O against services
pub fn prepare(config_path: Option<&Path>, args: &TargetArgs) -> Result<Session> {
    let config = load_config(config_path)?;

    let mode = match &args.local {
        Some(root) => Mode::Local { root: root.clone() },
        None => Mode::Remote,
    };
    let target =
        TargetResolver::from_config(&config).resolve(&args.client, &args.environment, mode)?;

    let plan = RunPlan::build(&ServiceCatalog::from_config(&config), &args.services)?;

    let provider: Arc<dyn CredentialProvider> = match &args.credentials {
        Some(path) => Arc::new(
            StaticCredentialProvider::from_yaml_file(path)
                .with_context(|| format!("Failed to load credentials from {}", path.display()))?,
        ),
        None => Arc::new(CommandCredentialProvider::from_config(&config)),
    };

    let runner: Arc<dyn ServiceRunner> = if target.is_local() {
        Arc::new(LocalRunner::new())
    } else {
        Arc::new(KubeRunner::from_config(&config))
    };

    Ok(Session {
        config,
        target,
        plan,
        provider,
        runner,
    })
}

/// Report an error that stops the command before anything ran
pub fn refuse(err: &anyhow::Error) -> i32 {
    eprintln!("Error: {:#}", err);
    EXIT_REFUSED
}
