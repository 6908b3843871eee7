//! # Reseed Orchestration
//!
//! Resets and reseeds the persistent state of a multi-service platform for
//! one explicitly authorized (client, environment) target.
//!
//! A run goes through a fixed sequence:
//!
//! 1. [`TargetResolver`] turns user input into a [`Target`], rejecting anything
//!    off the allow-list.
//! 2. [`RunPlan`] orders the service table so a shared schema's owner always runs
//!    before the services that migrate against it.
//! 3. [`PreflightValidator`] checks configuration keys, tool reachability and
//!    datastore connectivity without mutating anything.
//! 4. A [`ConfirmationGate`] shows the affected datastores and blocks until the
//!    operator types the exact confirmation phrase.
//! 5. [`ResetOrchestrator`] drives every service through
//!    environment preparation, migrations and seeding, classifying each result
//!    into a [`ServiceOutcome`] collected in a [`RunSummary`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use reseed_orchestration::{
//!     AssumeYesGate, CommandCredentialProvider, KubeRunner, Mode, ResetOrchestrator,
//!     RunOptions, RunPlan, ServiceCatalog, TargetResolver,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = reseed_config::Config::load(None)?;
//! let target = TargetResolver::from_config(&config).resolve("qa", "sandbox", Mode::Remote)?;
//! let plan = RunPlan::build(&ServiceCatalog::from_config(&config), &[])?;
//!
//! let orchestrator = ResetOrchestrator::new(
//!     Arc::new(CommandCredentialProvider::from_config(&config)),
//!     Arc::new(KubeRunner::from_config(&config)),
//!     config.timeouts,
//! )
//! .with_options(RunOptions::default());
//!
//! let report = orchestrator.reset(&target, &plan, &AssumeYesGate).await?;
//! std::process::exit(report.summary.exit_code());
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod confirm;
mod credentials;
mod descriptor;
mod interrupt;
mod orchestrator;
mod outcome;
mod plan;
mod preflight;
mod report;
mod runner;
mod runners;
mod scope;
mod target;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use confirm::{AssumeYesGate, ConfirmationGate, ImpactSummary, TerminalGate, phrase_matches};
pub use credentials::{
    CommandCredentialProvider, ConfigMap, CredentialProvider, Lookup, StaticCredentialProvider,
};
pub use descriptor::{MigrationTool, SchemaRef, ServiceCatalog, ServiceDescriptor};
pub use interrupt::Interrupt;
pub use orchestrator::{ResetOrchestrator, ResetReport, RunOptions};
pub use outcome::{RunSummary, RunVerdict, ServiceOutcome, Stage, StageTransition, Status};
pub use plan::{DependencyGraph, RunPlan};
pub use preflight::{Datastore, PreflightReport, PreflightValidator, ValidationResult};
pub use report::{FailureHint, Redactor, RunLog, classify_failure, redact_connection_string};
pub use runner::{ExecContext, Invocation, Location, ServiceRunner};
pub use runners::{KubeRunner, LocalRunner};
pub use scope::{ConfigScope, render_env_file};
pub use target::{AllowList, Environment, Mode, Target, TargetResolver};

/// Error types for reset operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested target is not allowed or malformed
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The credential backend failed (distinct from a secret being absent)
    #[error("Credential provider error for {service}: {reason}")]
    Provider {
        /// Service whose credentials were requested
        service: String,
        /// What went wrong
        reason: String,
    },

    /// Pre-flight validation failed for a service
    #[error("Validation failed for {service}: {}", reasons.join("; "))]
    ValidationFailed {
        /// Service that failed validation
        service: String,
        /// Every failed check
        reasons: Vec<String>,
    },

    /// Migrations (or a local schema reset) did not apply
    #[error("Migration of schema '{schema}' failed for {service}: {reason}")]
    MigrationFailed {
        /// Service being migrated
        service: String,
        /// Schema being migrated
        schema: String,
        /// What went wrong
        reason: String,
    },

    /// Migrations applied but the seed entry point failed
    #[error("Seed failed for {service}: {reason}")]
    SeedFailed {
        /// Service being seeded
        service: String,
        /// What went wrong
        reason: String,
    },

    /// A shared schema would be dropped by a service that does not own it, or twice
    #[error("Shared schema violation: {0}")]
    SharedSchema(String),

    /// The operator interrupted the run
    #[error("interrupted")]
    Interrupted,

    /// The run plan could not be built
    #[error("Plan error: {0}")]
    Plan(String),

    /// Command executor errors
    #[error("Command execution error: {0}")]
    CommandExecutor(#[from] command_executor::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] reseed_config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type for reset operations
pub type Result<T> = std::result::Result<T, Error>;
