//! The reset orchestrator
//!
//! Drives each planned service through
//! `NotStarted -> EnvironmentPrepared -> MigrationsApplied -> Seeded`, one
//! lane at a time or with independent lanes interleaved, and classifies every
//! service into a [`ServiceOutcome`].

use crate::{
    ConfigScope, ConfirmationGate, CredentialProvider, Error, ExecContext, ImpactSummary,
    Interrupt, Invocation, Lookup, PreflightReport, PreflightValidator, Result, RunLog, RunPlan,
    RunSummary, SchemaRef, ServiceDescriptor, ServiceOutcome, ServiceRunner, Stage, Target,
    outcome::ServiceProgress,
    report::{FailureHint, classify_failure},
};
use chrono::Utc;
use command_executor::ExitResult;
use reseed_config::Timeouts;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Behaviour switches for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Read and validate only; record the commands that would run
    pub dry_run: bool,
    /// Drop and rebuild owned schemas before migrating (local targets only)
    pub reset_schemas: bool,
    /// Run independent lanes concurrently
    pub parallel: bool,
}

/// Pre-flight findings and the run summary
#[derive(Debug, Clone)]
pub struct ResetReport {
    /// Pre-flight pass shown to the operator
    pub preflight: PreflightReport,
    /// Outcome of the run
    pub summary: RunSummary,
}

/// A failed step and what its output suggests
struct StepFailure {
    error: Error,
    hint: Option<FailureHint>,
}

impl StepFailure {
    fn reason(&self) -> String {
        match &self.error {
            Error::Interrupted => "interrupted".to_string(),
            other => other.to_string(),
        }
    }
}

/// Schemas dropped so far in this run, as `(owner, schema)`
#[derive(Debug, Default)]
struct DropLedger {
    dropped: Mutex<HashSet<(String, String)>>,
}

impl DropLedger {
    fn claim(&self, owner: &str, schema: &SchemaRef) -> Result<()> {
        if !schema.is_owned() {
            return Err(Error::SharedSchema(format!(
                "{} does not own schema '{}'",
                owner, schema.name
            )));
        }
        let mut dropped = self
            .dropped
            .lock()
            .map_err(|_| Error::Other("drop ledger poisoned".to_string()))?;
        if !dropped.insert((owner.to_string(), schema.name.clone())) {
            return Err(Error::SharedSchema(format!(
                "schema '{}' was already dropped in this run",
                schema.name
            )));
        }
        Ok(())
    }
}

/// Runs reset procedures against one target
pub struct ResetOrchestrator {
    provider: Arc<dyn CredentialProvider>,
    runner: Arc<dyn ServiceRunner>,
    timeouts: Timeouts,
    options: RunOptions,
    interrupt: Interrupt,
    log: Option<RunLog>,
}

impl ResetOrchestrator {
    /// Create an orchestrator over the credential and runner boundaries
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        runner: Arc<dyn ServiceRunner>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            provider,
            runner,
            timeouts,
            options: RunOptions::default(),
            interrupt: Interrupt::new(),
            log: None,
        }
    }

    /// Set run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an interrupt with a signal handler
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Write per-service logs and the summary into a run directory
    pub fn with_run_log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run options in effect
    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// The interrupt every runner call is raced against
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Read-only checks over the planned services
    pub async fn preflight(&self, target: &Target, plan: &RunPlan) -> PreflightReport {
        PreflightValidator::new(self.provider.clone(), self.runner.clone(), self.timeouts)
            .validate(target, plan.services())
            .await
    }

    /// Pre-flight, confirm, then run
    ///
    /// Dry runs never mutate and do not consult the gate.
    pub async fn reset(
        &self,
        target: &Target,
        plan: &RunPlan,
        gate: &dyn ConfirmationGate,
    ) -> Result<ResetReport> {
        info!(target_id = %target, services = plan.len(), dry_run = self.options.dry_run, "starting reset");
        let preflight = self.preflight(target, plan).await;

        let confirmed = if self.options.dry_run {
            true
        } else {
            let impact = ImpactSummary::new(
                target,
                plan,
                &preflight,
                self.options.reset_schemas && target.is_local(),
            );
            gate.confirm(&impact)?
        };

        let summary = self.run(target, plan, confirmed).await;
        Ok(ResetReport { preflight, summary })
    }

    /// Execute the plan
    ///
    /// `confirmed == false` records every service as skipped without touching
    /// either boundary.
    pub async fn run(&self, target: &Target, plan: &RunPlan, confirmed: bool) -> RunSummary {
        let mut summary = RunSummary::new(target, self.options.dry_run);
        summary.log_dir = self.log.as_ref().map(|log| log.dir().to_path_buf());

        if !confirmed {
            warn!(target_id = %target, "run not confirmed; nothing was changed");
            for service in plan.services() {
                summary.record(ServiceOutcome::skipped(
                    &service.name,
                    "run aborted: not confirmed",
                ));
            }
            summary.aborted = Some("operator did not confirm".to_string());
            return self.finish(summary).await;
        }

        if !self.options.dry_run {
            self.interrupt.arm();
        }

        let ledger = DropLedger::default();
        let outcomes: Vec<ServiceOutcome> = if self.options.parallel {
            let lanes = plan
                .lanes()
                .iter()
                .map(|lane| self.run_lane(target, plan, lane, &ledger));
            futures::future::join_all(lanes)
                .await
                .into_iter()
                .flatten()
                .collect()
        } else {
            let order: Vec<String> = plan.names().into_iter().map(String::from).collect();
            self.run_lane(target, plan, &order, &ledger).await
        };

        self.interrupt.disarm();

        let mut by_name: HashMap<String, ServiceOutcome> = outcomes
            .into_iter()
            .map(|outcome| (outcome.service.clone(), outcome))
            .collect();
        for name in plan.names() {
            if let Some(outcome) = by_name.remove(name) {
                summary.record(outcome);
            }
        }
        summary.interrupted = self.interrupt.is_triggered();

        self.finish(summary).await
    }

    async fn finish(&self, mut summary: RunSummary) -> RunSummary {
        summary.ended_at = Utc::now();
        info!(
            run_id = %summary.run_id,
            verdict = ?summary.verdict(),
            success = summary.count(crate::Status::Success),
            partial = summary.count(crate::Status::PartialSuccess),
            failed = summary.count(crate::Status::Failed),
            skipped = summary.count(crate::Status::Skipped),
            "run finished"
        );
        if let Some(log) = &self.log {
            if let Err(e) = log.write_summary(&summary).await {
                error!(error = %e, "failed to write run summary");
            }
        }
        summary
    }

    /// Services of one lane, strictly one after another
    async fn run_lane(
        &self,
        target: &Target,
        plan: &RunPlan,
        lane: &[String],
        ledger: &DropLedger,
    ) -> Vec<ServiceOutcome> {
        let mut outcomes = Vec::with_capacity(lane.len());
        for name in lane {
            let Some(service) = plan.get(name) else {
                continue;
            };
            let outcome = if self.interrupt.is_triggered() {
                ServiceOutcome::skipped(name, "interrupted before start")
            } else {
                self.run_service(target, service, ledger).await
            };
            info!(
                service = %outcome.service,
                status = %outcome.status,
                stage = %outcome.stage_reached,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "service finished"
            );
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_service(
        &self,
        target: &Target,
        service: &ServiceDescriptor,
        ledger: &DropLedger,
    ) -> ServiceOutcome {
        let log_path = self
            .log
            .as_ref()
            .map(|log| log.service_log_path(&service.name));
        let mut progress = ServiceProgress::start(&service.name, log_path);
        info!(service = %service.name, "starting service");

        let config = match self
            .interrupt
            .guard(self.provider.fetch(target, &service.name))
            .await
        {
            Ok(Lookup::Found(config)) => config,
            Ok(Lookup::NotFound) => {
                return progress.skip("no secret provisioned for this target");
            }
            Err(Error::Interrupted) => return progress.interrupted(),
            Err(e) => {
                progress.set_failure(format!("credentials unavailable: {}", e), None);
                return progress.finish();
            }
        };
        if let Some(log) = &self.log {
            log.register_secrets(&config);
        }

        let ctx = match self.interrupt.guard(self.runner.locate(target, service)).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return progress.skip("no running pod or workspace checkout"),
            Err(Error::Interrupted) => return progress.interrupted(),
            Err(e) => {
                progress.set_failure(format!("could not locate service: {}", e), None);
                return progress.finish();
            }
        };
        debug!(service = %service.name, location = %ctx.location, "located");

        if self.options.dry_run {
            progress.advance(Stage::EnvironmentPrepared);
            progress.plan(format!("write {} ({} keys)", ctx.env_file, config.len()));
            for invocation in self.procedure(target, service) {
                let rendered = self.runner.render(&ctx, &invocation);
                self.log_line(&service.name, &format!("[dry run] {}", rendered))
                    .await;
                progress.plan(rendered);
            }
            return progress.skip("dry run");
        }

        let scope = match ConfigScope::acquire(
            self.runner.clone(),
            &ctx,
            &config,
            self.timeouts.probe(),
        )
        .await
        {
            Ok(scope) => scope,
            Err(e) => {
                progress.set_failure(format!("could not materialise configuration: {}", e), None);
                return progress.finish();
            }
        };
        progress.advance(Stage::EnvironmentPrepared);

        let mut interrupted = false;
        if let Err(failure) = self
            .migrate_and_seed(target, service, &ctx, &mut progress, ledger)
            .await
        {
            let reason = failure.reason();
            warn!(service = %service.name, stage = %progress.stage(), reason = %reason, "service step failed");
            interrupted = matches!(failure.error, Error::Interrupted);
            progress.set_failure(reason, failure.hint);
        }

        // Released on every path, including interrupts
        if let Err(e) = scope.release().await {
            warn!(service = %service.name, error = %e, "configuration file not restored");
            progress.warn(format!("configuration file not restored: {}", e));
        }

        if interrupted {
            progress.interrupted()
        } else {
            progress.finish()
        }
    }

    /// Mutating commands for a service, in execution order
    fn procedure(&self, target: &Target, service: &ServiceDescriptor) -> Vec<Invocation> {
        let mut steps = Vec::new();
        for schema in &service.schemas {
            if self.drops(target, schema) {
                steps.push(Invocation::new(
                    format!("reset {}", schema.name),
                    service.tool.reset_command(schema),
                    self.timeouts.reset(),
                ));
            }
            steps.push(Invocation::new(
                format!("migrate {}", schema.name),
                service.tool.apply_command(schema),
                self.timeouts.migrate(),
            ));
        }
        steps.push(Invocation::new(
            "seed",
            &service.seed_command,
            self.timeouts.seed(),
        ));
        steps
    }

    /// Only owned schemas in local workspaces are ever dropped
    fn drops(&self, target: &Target, schema: &SchemaRef) -> bool {
        self.options.reset_schemas && target.is_local() && schema.is_owned()
    }

    async fn migrate_and_seed(
        &self,
        target: &Target,
        service: &ServiceDescriptor,
        ctx: &ExecContext,
        progress: &mut ServiceProgress,
        ledger: &DropLedger,
    ) -> std::result::Result<(), StepFailure> {
        progress.migrations_started();

        for schema in &service.schemas {
            let migration_failed = |reason: String| Error::MigrationFailed {
                service: service.name.clone(),
                schema: schema.name.clone(),
                reason,
            };

            if self.drops(target, schema) {
                ledger.claim(&service.name, schema).map_err(|error| StepFailure {
                    error,
                    hint: None,
                })?;
                let reset = Invocation::new(
                    format!("reset {}", schema.name),
                    service.tool.reset_command(schema),
                    self.timeouts.reset(),
                );
                self.expect_success(ctx, &reset, migration_failed).await?;
            }

            let migrate = Invocation::new(
                format!("migrate {}", schema.name),
                service.tool.apply_command(schema),
                self.timeouts.migrate(),
            );
            self.expect_success(ctx, &migrate, migration_failed).await?;
        }
        progress.advance(Stage::MigrationsApplied);

        let seed = Invocation::new("seed", &service.seed_command, self.timeouts.seed());
        self.expect_success(ctx, &seed, |reason| Error::SeedFailed {
            service: service.name.clone(),
            reason,
        })
        .await?;
        progress.advance(Stage::Seeded);
        Ok(())
    }

    async fn expect_success(
        &self,
        ctx: &ExecContext,
        invocation: &Invocation,
        to_error: impl FnOnce(String) -> Error,
    ) -> std::result::Result<(), StepFailure> {
        match self.exec(ctx, invocation).await {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(StepFailure {
                error: to_error(format!("{} exited with {}", invocation.label, result.status)),
                hint: classify_failure(&result.output),
            }),
            Err(Error::Interrupted) => Err(StepFailure {
                error: Error::Interrupted,
                hint: None,
            }),
            Err(e) => {
                let hint = match &e {
                    Error::CommandExecutor(inner) if inner.is_timeout() => {
                        Some(FailureHint::TimedOut)
                    }
                    _ => None,
                };
                Err(StepFailure {
                    error: to_error(e.to_string()),
                    hint,
                })
            }
        }
    }

    /// Run one command, raced against the interrupt, with its output logged
    async fn exec(&self, ctx: &ExecContext, invocation: &Invocation) -> Result<ExitResult> {
        let rendered = self.runner.render(ctx, invocation);
        info!(service = %ctx.service, step = %invocation.label, "running step");
        debug!(service = %ctx.service, command = %rendered, "command");
        self.log_line(&ctx.service, &format!("$ {}", rendered)).await;

        let result = self
            .interrupt
            .guard(self.runner.run(ctx, invocation))
            .await;

        match &result {
            Ok(exit) => {
                if !exit.output.is_empty() {
                    self.log_line(&ctx.service, &exit.output).await;
                }
                self.log_line(
                    &ctx.service,
                    &format!("[{}] {}", invocation.label, exit.status),
                )
                .await;
            }
            Err(e) => {
                self.log_line(&ctx.service, &format!("[{}] error: {}", invocation.label, e))
                    .await;
            }
        }
        result
    }

    async fn log_line(&self, service: &str, text: &str) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(service, text).await {
                warn!(service, error = %e, "failed to write service log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str, shared_from: Option<&str>) -> SchemaRef {
        SchemaRef {
            name: name.into(),
            connection_env: "DATABASE_URL".into(),
            migrations: "prisma/schema.prisma".into(),
            shared_from: shared_from.map(String::from),
        }
    }

    #[test]
    fn test_drop_ledger_allows_each_owned_schema_once() {
        let ledger = DropLedger::default();
        ledger.claim("core-api", &schema("core", None)).unwrap();
        ledger.claim("auth-api", &schema("auth", None)).unwrap();

        let err = ledger.claim("core-api", &schema("core", None)).unwrap_err();
        assert!(matches!(err, Error::SharedSchema(msg) if msg.contains("already dropped")));
    }

    #[test]
    fn test_drop_ledger_refuses_shared_schema() {
        let ledger = DropLedger::default();
        let err = ledger
            .claim("data-builder", &schema("core", Some("core-api")))
            .unwrap_err();
        assert!(matches!(err, Error::SharedSchema(msg) if msg.contains("does not own")));
    }
}
