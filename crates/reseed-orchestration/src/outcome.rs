//! Per-service outcomes and the run summary
//!
//! Classification is a pure function of the stage a service reached:
//!
//! | stage reached       | status           |
//! |---------------------|------------------|
//! | `Seeded`            | `Success`        |
//! | `MigrationsApplied` | `PartialSuccess` |
//! | anything earlier    | `Failed`         |
//!
//! `Skipped` is reserved for services that were never attempted (no secret,
//! not located, dry run, declined or interrupted before start).

use crate::{FailureHint, Target};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Progress of a service through its reset procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    /// Nothing has been done
    NotStarted,
    /// Configuration is materialised in the execution context
    EnvironmentPrepared,
    /// Every schema's migrations applied
    MigrationsApplied,
    /// The seed entry point completed
    Seeded,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::NotStarted => "not started",
            Stage::EnvironmentPrepared => "environment prepared",
            Stage::MigrationsApplied => "migrations applied",
            Stage::Seeded => "seeded",
        };
        f.write_str(name)
    }
}

/// Final classification of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    /// Migrated and seeded
    Success,
    /// Migrated, seed failed; retry the seed only
    PartialSuccess,
    /// Stopped before migrations completed; a full rerun is needed
    Failed,
    /// Not attempted
    Skipped,
}

impl Status {
    /// Classify an attempted service by the furthest stage it reached
    pub fn from_stage(stage: Stage) -> Self {
        match stage {
            Stage::Seeded => Status::Success,
            Stage::MigrationsApplied => Status::PartialSuccess,
            Stage::NotStarted | Stage::EnvironmentPrepared => Status::Failed,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::PartialSuccess => "partial success",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Time a stage was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTransition {
    /// Stage reached
    pub stage: Stage,
    /// When
    pub at: DateTime<Utc>,
}

/// Outcome of one service in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    /// Service name
    pub service: String,
    /// Classification
    pub status: Status,
    /// Furthest stage reached
    pub stage_reached: Stage,
    /// Why the service failed or was skipped
    pub reason: Option<String>,
    /// Per-service log file
    pub log_path: Option<PathBuf>,
    /// Every stage reached, in order
    pub transitions: Vec<StageTransition>,
    /// When the first migration command started
    pub migrations_started_at: Option<DateTime<Utc>>,
    /// Commands a dry run would have executed
    pub planned_commands: Vec<String>,
    /// Likely cause, classified from the failing command's output
    pub hint: Option<FailureHint>,
    /// Non-fatal problems, e.g. a configuration file that could not be restored
    pub warnings: Vec<String>,
    /// When work on the service began
    pub started_at: DateTime<Utc>,
    /// When work on the service ended
    pub ended_at: DateTime<Utc>,
}

impl ServiceOutcome {
    /// An outcome for a service that was never attempted
    pub fn skipped(service: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            service: service.into(),
            status: Status::Skipped,
            stage_reached: Stage::NotStarted,
            reason: Some(reason.into()),
            log_path: None,
            transitions: Vec::new(),
            migrations_started_at: None,
            planned_commands: Vec::new(),
            hint: None,
            warnings: Vec::new(),
            started_at: now,
            ended_at: now,
        }
    }

    /// When a stage was reached, if it was
    pub fn reached_at(&self, stage: Stage) -> Option<DateTime<Utc>> {
        self.transitions
            .iter()
            .find(|t| t.stage == stage)
            .map(|t| t.at)
    }
}

/// Builder tracking a service while its procedure runs
#[derive(Debug)]
pub(crate) struct ServiceProgress {
    outcome: ServiceOutcome,
}

impl ServiceProgress {
    pub(crate) fn start(service: &str, log_path: Option<PathBuf>) -> Self {
        let mut outcome = ServiceOutcome::skipped(service, "");
        outcome.reason = None;
        outcome.log_path = log_path;
        Self { outcome }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.outcome.stage_reached
    }

    pub(crate) fn advance(&mut self, stage: Stage) {
        self.outcome.stage_reached = stage;
        self.outcome.transitions.push(StageTransition {
            stage,
            at: Utc::now(),
        });
    }

    pub(crate) fn migrations_started(&mut self) {
        if self.outcome.migrations_started_at.is_none() {
            self.outcome.migrations_started_at = Some(Utc::now());
        }
    }

    pub(crate) fn plan(&mut self, command: String) {
        self.outcome.planned_commands.push(command);
    }

    pub(crate) fn warn(&mut self, warning: String) {
        self.outcome.warnings.push(warning);
    }

    pub(crate) fn set_failure(&mut self, reason: String, hint: Option<FailureHint>) {
        self.outcome.reason = Some(reason);
        self.outcome.hint = hint;
    }

    /// Classify by stage reached
    pub(crate) fn finish(mut self) -> ServiceOutcome {
        self.outcome.status = Status::from_stage(self.outcome.stage_reached);
        self.outcome.ended_at = Utc::now();
        self.outcome
    }

    /// Record as failed regardless of stage; the stage reached is kept
    pub(crate) fn interrupted(mut self) -> ServiceOutcome {
        self.outcome.status = Status::Failed;
        self.outcome.reason = Some("interrupted".to_string());
        self.outcome.hint = None;
        self.outcome.ended_at = Utc::now();
        self.outcome
    }

    /// Record as skipped regardless of stage
    pub(crate) fn skip(mut self, reason: impl Into<String>) -> ServiceOutcome {
        self.outcome.status = Status::Skipped;
        self.outcome.reason = Some(reason.into());
        self.outcome.ended_at = Utc::now();
        self.outcome
    }
}

/// Overall verdict of a run, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunVerdict {
    /// Every attempted service succeeded
    Succeeded,
    /// Nothing failed, but at least one service needs its seed retried
    SucceededWithWarnings,
    /// At least one service failed
    Failed,
    /// The run was declined before any mutation
    Aborted,
    /// The operator interrupted the run
    Interrupted,
}

impl RunVerdict {
    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            RunVerdict::Succeeded => 0,
            RunVerdict::Failed => 1,
            RunVerdict::SucceededWithWarnings => 2,
            RunVerdict::Aborted => 3,
            RunVerdict::Interrupted => 130,
        }
    }
}

/// Auditable record of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Target the run acted on
    pub target: Target,
    /// Outcomes in plan order
    pub outcomes: IndexMap<String, ServiceOutcome>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub ended_at: DateTime<Utc>,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Whether the operator interrupted the run
    pub interrupted: bool,
    /// Why the run was aborted before executing, if it was
    pub aborted: Option<String>,
    /// Directory holding the run's log files
    pub log_dir: Option<PathBuf>,
}

impl RunSummary {
    pub(crate) fn new(target: &Target, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            target: target.clone(),
            outcomes: IndexMap::new(),
            started_at: now,
            ended_at: now,
            dry_run,
            interrupted: false,
            aborted: None,
            log_dir: None,
        }
    }

    pub(crate) fn record(&mut self, outcome: ServiceOutcome) {
        self.outcomes.insert(outcome.service.clone(), outcome);
    }

    /// Outcome of a service
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes.get(service)
    }

    /// Number of services with the given status
    pub fn count(&self, status: Status) -> usize {
        self.outcomes.values().filter(|o| o.status == status).count()
    }

    /// Services with the given status, in plan order
    pub fn services_with(&self, status: Status) -> Vec<&str> {
        self.outcomes
            .values()
            .filter(|o| o.status == status)
            .map(|o| o.service.as_str())
            .collect()
    }

    /// Services whose migrations applied but seed failed
    pub fn retry_seed_only(&self) -> Vec<&str> {
        self.services_with(Status::PartialSuccess)
    }

    /// Services that need the whole procedure again
    pub fn full_rerun_required(&self) -> Vec<&str> {
        self.services_with(Status::Failed)
    }

    /// Overall verdict
    pub fn verdict(&self) -> RunVerdict {
        if self.aborted.is_some() {
            RunVerdict::Aborted
        } else if self.interrupted {
            RunVerdict::Interrupted
        } else if self.count(Status::Failed) > 0 {
            RunVerdict::Failed
        } else if self.count(Status::PartialSuccess) > 0 {
            RunVerdict::SucceededWithWarnings
        } else {
            RunVerdict::Succeeded
        }
    }

    /// Process exit code for the run
    pub fn exit_code(&self) -> i32 {
        self.verdict().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllowList, Mode, TargetResolver};

    fn summary(statuses: &[Status]) -> RunSummary {
        let target = TargetResolver::new(AllowList::new(["qa"]))
            .resolve("qa", "sandbox", Mode::Remote)
            .unwrap();
        let mut summary = RunSummary::new(&target, false);
        for (i, status) in statuses.iter().enumerate() {
            let mut outcome = ServiceOutcome::skipped(format!("svc-{}", i), "");
            outcome.status = *status;
            summary.record(outcome);
        }
        summary
    }

    #[test]
    fn test_classification_by_stage() {
        let expected = [
            (Stage::NotStarted, Status::Failed),
            (Stage::EnvironmentPrepared, Status::Failed),
            (Stage::MigrationsApplied, Status::PartialSuccess),
            (Stage::Seeded, Status::Success),
        ];
        for (stage, status) in expected {
            assert_eq!(Status::from_stage(stage), status, "{}", stage);
        }
    }

    #[test]
    fn test_progress_records_transitions() {
        let mut progress = ServiceProgress::start("core-api", None);
        progress.advance(Stage::EnvironmentPrepared);
        progress.migrations_started();
        progress.advance(Stage::MigrationsApplied);
        progress.set_failure("seed exited with exit code 1".into(), None);
        let outcome = progress.finish();

        assert_eq!(outcome.status, Status::PartialSuccess);
        assert_eq!(outcome.transitions.len(), 2);
        assert!(outcome.reached_at(Stage::MigrationsApplied).is_some());
        assert!(outcome.reached_at(Stage::Seeded).is_none());
        assert!(outcome.migrations_started_at.is_some());
    }

    #[test]
    fn test_interrupted_is_failed_at_any_stage() {
        let mut progress = ServiceProgress::start("core-api", None);
        progress.advance(Stage::EnvironmentPrepared);
        progress.advance(Stage::MigrationsApplied);
        let outcome = progress.interrupted();

        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.stage_reached, Stage::MigrationsApplied);
        assert_eq!(outcome.reason.as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_verdict_and_exit_codes() {
        assert_eq!(summary(&[Status::Success, Status::Skipped]).exit_code(), 0);
        assert_eq!(summary(&[Status::Success, Status::PartialSuccess]).exit_code(), 2);
        assert_eq!(summary(&[Status::PartialSuccess, Status::Failed]).exit_code(), 1);
        assert_eq!(summary(&[]).exit_code(), 0);

        let mut interrupted = summary(&[Status::Failed]);
        interrupted.interrupted = true;
        assert_eq!(interrupted.verdict(), RunVerdict::Interrupted);
        assert_eq!(interrupted.exit_code(), 130);

        let mut aborted = summary(&[Status::Skipped]);
        aborted.aborted = Some("not confirmed".into());
        assert_eq!(aborted.exit_code(), 3);
    }

    #[test]
    fn test_retry_guidance() {
        let summary = summary(&[Status::Success, Status::PartialSuccess, Status::Failed]);
        assert_eq!(summary.retry_seed_only(), vec!["svc-1"]);
        assert_eq!(summary.full_rerun_required(), vec!["svc-2"]);
        assert_eq!(summary.count(Status::Success), 1);
    }

    #[test]
    fn test_summary_serializes_in_plan_order() {
        let json = serde_json::to_value(summary(&[Status::Success, Status::Skipped])).unwrap();
        let keys: Vec<&String> = json["outcomes"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["svc-0", "svc-1"]);
        assert_eq!(json["target"]["client"], "qa");
        assert_eq!(json["target"]["mode"], "remote");
    }
}
