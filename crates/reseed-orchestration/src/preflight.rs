//! Read-only checks run before anything is mutated
//!
//! For each service the validator fetches its configuration, checks the
//! required keys are present, locates its execution context, confirms the
//! migration tool responds, and runs a single `SELECT 1` against the first
//! schema's datastore. Nothing here writes to a service.

use crate::{
    CredentialProvider, Lookup, ServiceDescriptor, ServiceRunner, Target,
    report::{classify_failure, redact_connection_string},
    runner::Invocation,
};
use indexmap::IndexMap;
use reseed_config::Timeouts;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verdict for one service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// Whether every check passed
    pub passed: bool,
    /// Every failed check
    pub reasons: Vec<String>,
}

impl ValidationResult {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            passed: reasons.is_empty(),
            reasons,
        }
    }
}

/// A datastore a run would touch, shown to the operator before confirming
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Datastore {
    /// Service migrating the schema
    pub service: String,
    /// Schema name
    pub schema: String,
    /// Connection string without credentials
    pub location: String,
    /// Owning service when the schema is shared
    pub shared_from: Option<String>,
}

impl std::fmt::Display for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {} -> {}", self.service, self.schema, self.location)?;
        if let Some(owner) = &self.shared_from {
            write!(f, " (owned by {})", owner)?;
        }
        Ok(())
    }
}

/// Result of a pre-flight pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    /// Per-service verdicts for services that have a secret, in plan order
    pub results: IndexMap<String, ValidationResult>,
    /// Services with no secret in this target; excluded from the run
    pub not_found: Vec<String>,
    /// Services with a secret but no running pod or checkout
    pub unavailable: Vec<String>,
    /// Credential backend failures, as run-level warnings
    pub provider_errors: Vec<String>,
    /// Datastores the run would touch
    pub datastores: Vec<Datastore>,
}

impl PreflightReport {
    /// Services whose checks all passed
    pub fn passed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.passed)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Services with at least one failed check
    pub fn failed(&self) -> Vec<(&str, &ValidationResult)> {
        self.results
            .iter()
            .filter(|(_, r)| !r.passed)
            .map(|(name, r)| (name.as_str(), r))
            .collect()
    }

    /// True when every validated service passed
    pub fn all_passed(&self) -> bool {
        self.results.values().all(|r| r.passed)
    }
}

/// Runs the read-only checks
pub struct PreflightValidator {
    provider: Arc<dyn CredentialProvider>,
    runner: Arc<dyn ServiceRunner>,
    timeouts: Timeouts,
}

impl PreflightValidator {
    /// Create a validator over the given boundaries
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        runner: Arc<dyn ServiceRunner>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            provider,
            runner,
            timeouts,
        }
    }

    /// Validate every service, in order
    pub async fn validate(
        &self,
        target: &Target,
        services: &[ServiceDescriptor],
    ) -> PreflightReport {
        let mut report = PreflightReport::default();

        for service in services {
            self.validate_service(target, service, &mut report).await;
        }

        info!(
            passed = report.passed().len(),
            failed = report.failed().len(),
            not_found = report.not_found.len(),
            unavailable = report.unavailable.len(),
            "pre-flight complete"
        );
        report
    }

    async fn validate_service(
        &self,
        target: &Target,
        service: &ServiceDescriptor,
        report: &mut PreflightReport,
    ) {
        let name = service.name.clone();

        let config = match self.provider.fetch(target, &name).await {
            Ok(Lookup::Found(config)) => config,
            Ok(Lookup::NotFound) => {
                debug!(service = %name, "no secret provisioned");
                report.not_found.push(name);
                return;
            }
            Err(e) => {
                warn!(service = %name, error = %e, "credential lookup failed");
                report.provider_errors.push(format!("{}: {}", name, e));
                report.results.insert(
                    name,
                    ValidationResult::from_reasons(vec![format!("credentials unavailable: {}", e)]),
                );
                return;
            }
        };

        let mut reasons = Vec::new();

        let missing: Vec<String> = service
            .required_config_keys()
            .into_iter()
            .filter(|key| config.get(key).is_none_or(|v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            reasons.push(format!("missing configuration keys: {}", missing.join(", ")));
        }

        for schema in &service.schemas {
            let location = config
                .get(&schema.connection_env)
                .map(String::as_str)
                .map(redact_connection_string)
                .unwrap_or_else(|| format!("<{} unset>", schema.connection_env));
            report.datastores.push(Datastore {
                service: name.clone(),
                schema: schema.name.clone(),
                location,
                shared_from: schema.shared_from.clone(),
            });
        }

        let ctx = match self.runner.locate(target, service).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                debug!(service = %name, "execution context not found");
                report.unavailable.push(name.clone());
                reasons.push("no running pod or workspace checkout".to_string());
                report
                    .results
                    .insert(name, ValidationResult::from_reasons(reasons));
                return;
            }
            Err(e) => {
                reasons.push(format!("could not locate service: {}", e));
                report
                    .results
                    .insert(name, ValidationResult::from_reasons(reasons));
                return;
            }
        };

        let probe_timeout = self.timeouts.probe();
        let version = Invocation::new("tool check", service.tool.version_command(), probe_timeout);
        match self.runner.run(&ctx, &version).await {
            Ok(result) if result.success() => {}
            Ok(result) => reasons.push(format!(
                "{} not available ({})",
                service.tool, result.status
            )),
            Err(e) => reasons.push(format!("{} check failed: {}", service.tool, e)),
        }

        // A single read probe against the first schema
        let probe_target = service.probe_schema().and_then(|schema| {
            config
                .get(&schema.connection_env)
                .filter(|url| !url.is_empty())
                .map(|url| (schema, url))
        });
        if let Some((schema, url)) = probe_target {
            let probe = Invocation::new(
                format!("probe {}", schema.name),
                service.tool.probe_command(&schema.connection_env),
                probe_timeout,
            )
            .with_env(&schema.connection_env, url);
            match self.runner.run(&ctx, &probe).await {
                Ok(result) if result.success() => {}
                Ok(result) => {
                    let hint = classify_failure(&result.output)
                        .map(|h| format!(" ({})", h))
                        .unwrap_or_default();
                    reasons.push(format!(
                        "datastore probe for schema '{}' failed with {}{}",
                        schema.name, result.status, hint
                    ));
                }
                Err(e) => reasons.push(format!(
                    "datastore probe for schema '{}' failed: {}",
                    schema.name, e
                )),
            }
        }

        report
            .results
            .insert(name, ValidationResult::from_reasons(reasons));
    }
}
